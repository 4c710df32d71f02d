//! Host audio seam
//!
//! Decoding and output are delegated to the host. The engine only needs
//! to resolve a channel id to a source, open that source as a `Voice`,
//! and drive the voice's gain and transport.

use std::fmt;
use std::time::Duration;

use ambimix_common::ChannelId;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Handle to a playable source, as returned by library lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHandle {
    pub channel_id: ChannelId,
    /// Host-specific location (file path, URL, blob key)
    pub location: String,
    /// Length of one play-through, when known
    #[serde(default)]
    pub duration: Option<Duration>,
}

impl SourceHandle {
    pub fn new(channel_id: ChannelId, location: impl Into<String>) -> Self {
        Self {
            channel_id,
            location: location.into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Library lookup: resolves channel ids to playable sources
pub trait SourceResolver: Send + Sync {
    /// Returns None when the source no longer exists
    fn resolve(&self, channel_id: ChannelId) -> Option<SourceHandle>;

    fn is_resolvable(&self, channel_id: ChannelId) -> bool {
        self.resolve(channel_id).is_some()
    }
}

/// Callback a voice fires when its source plays through to the end
///
/// Not fired while native looping is enabled.
pub struct TrackEndHook(Box<dyn Fn() + Send + Sync>);

impl TrackEndHook {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Hook that ignores end-of-track notifications
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn fire(&self) {
        (self.0)()
    }
}

impl fmt::Debug for TrackEndHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TrackEndHook")
    }
}

/// Host-level gain automation (scheduled ramps run by the output driver)
pub trait GainAutomation {
    /// Drop every scheduled value after the current one
    fn cancel_scheduled(&mut self);

    /// Schedule a straight ramp from `from` to `to` over `duration`
    fn linear_ramp(&mut self, from: f32, to: f32, duration: Duration) -> Result<()>;

    /// Schedule an arbitrary curve, evenly spread over `duration`
    fn value_curve(&mut self, values: &[f32], duration: Duration) -> Result<()>;
}

/// One opened playback resource
pub trait Voice: Send {
    /// Start or resume playback from the current position
    fn play(&mut self) -> Result<()>;

    /// Halt playback, keeping the position
    fn pause(&mut self);

    /// Move the position back to the start of the source
    fn rewind(&mut self);

    /// Let the host loop the source without end-of-track notifications
    fn set_native_loop(&mut self, enabled: bool);

    /// Set the output gain immediately (0.0-1.0)
    fn set_gain(&mut self, gain: f32);

    /// Current output gain, including any running automation
    fn gain(&self) -> f32;

    /// Gain automation capability, if the host provides one
    fn automation(&mut self) -> Option<&mut dyn GainAutomation> {
        None
    }

    /// Release host resources; the voice is not used afterwards
    fn close(&mut self) {}
}

/// Host output primitive: opens sources as voices
pub trait AudioBackend: Send + Sync {
    /// Open (load) a source; `on_end` fires whenever playback reaches the end
    fn open(&self, source: &SourceHandle, on_end: TrackEndHook) -> Result<Box<dyn Voice>>;
}
