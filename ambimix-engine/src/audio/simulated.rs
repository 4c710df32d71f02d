//! In-process audio backend
//!
//! Produces no sound. Voices keep their gain in memory, run scheduled
//! gain automation against the tokio clock, and simulate end-of-track
//! with a timer when the source has a known duration. Every voice reports
//! into a per-channel `VoiceProbe` so callers can inspect what the engine
//! asked of the host.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ambimix_common::ChannelId;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use crate::audio::backend::{AudioBackend, GainAutomation, SourceHandle, TrackEndHook, Voice};
use crate::error::{Error, Result};

/// Record of everything done to one channel's voices
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceProbe {
    /// Times a voice was opened for this channel
    pub opens: usize,
    /// Times a voice was closed
    pub closes: usize,
    /// Calls to `play`
    pub plays: usize,
    pub is_playing: bool,
    pub native_loop: bool,
    /// Every immediate gain write, in order
    pub gain_writes: Vec<f32>,
    /// Automation curves scheduled
    pub scheduled_ramps: usize,
    /// Automation cancellations
    pub cancels: usize,
}

impl VoiceProbe {
    pub fn last_gain(&self) -> Option<f32> {
        self.gain_writes.last().copied()
    }
}

struct BackendShared {
    automation: bool,
    failing: Mutex<HashSet<ChannelId>>,
    probes: Mutex<HashMap<ChannelId, VoiceProbe>>,
}

impl BackendShared {
    fn probes(&self) -> MutexGuard<'_, HashMap<ChannelId, VoiceProbe>> {
        self.probes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, channel_id: ChannelId, f: impl FnOnce(&mut VoiceProbe)) {
        f(self.probes().entry(channel_id).or_default());
    }
}

/// Simulated host output
///
/// Cloning shares the probes and failure settings.
#[derive(Clone)]
pub struct SimulatedBackend {
    shared: Arc<BackendShared>,
}

impl SimulatedBackend {
    /// Backend without gain automation (ramps fall back to stepping)
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Backend whose voices expose gain automation
    pub fn with_automation() -> Self {
        Self::build(true)
    }

    fn build(automation: bool) -> Self {
        Self {
            shared: Arc::new(BackendShared {
                automation,
                failing: Mutex::new(HashSet::new()),
                probes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Make every future `open` of this channel fail
    pub fn fail_source(&self, channel_id: ChannelId) {
        self.failing().insert(channel_id);
    }

    /// Undo `fail_source`
    pub fn restore_source(&self, channel_id: ChannelId) {
        self.failing().remove(&channel_id);
    }

    /// Snapshot of the probe for a channel
    pub fn probe(&self, channel_id: ChannelId) -> Option<VoiceProbe> {
        self.shared.probes().get(&channel_id).cloned()
    }

    fn failing(&self) -> MutexGuard<'_, HashSet<ChannelId>> {
        self.shared.failing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for SimulatedBackend {
    fn open(&self, source: &SourceHandle, on_end: TrackEndHook) -> Result<Box<dyn Voice>> {
        if self.failing().contains(&source.channel_id) {
            return Err(Error::SourceLoad {
                channel_id: source.channel_id,
                reason: format!("cannot decode {}", source.location),
            });
        }

        self.shared.record(source.channel_id, |p| p.opens += 1);
        trace!(channel_id = source.channel_id, location = %source.location, "Opened simulated voice");

        Ok(Box::new(SimulatedVoice {
            channel_id: source.channel_id,
            duration: source.duration,
            backend: Arc::clone(&self.shared),
            on_end: Arc::new(on_end),
            native_loop: Arc::new(AtomicBool::new(false)),
            playing: false,
            end_timer: None,
            gain: 1.0,
            ramp: None,
        }))
    }
}

/// Gain automation in flight
struct ScheduledRamp {
    values: Vec<f32>,
    start: Instant,
    duration: Duration,
}

impl ScheduledRamp {
    fn value_now(&self) -> f32 {
        let last = self.values.len().saturating_sub(1);
        if self.duration.is_zero() || last == 0 {
            return self.values.last().copied().unwrap_or(0.0);
        }
        let t = self.start.elapsed().as_secs_f32() / self.duration.as_secs_f32();
        if t >= 1.0 {
            return self.values[last];
        }
        let pos = t * last as f32;
        let i = pos.floor() as usize;
        let frac = pos - i as f32;
        let a = self.values[i];
        let b = self.values[(i + 1).min(last)];
        a + (b - a) * frac
    }
}

struct SimulatedVoice {
    channel_id: ChannelId,
    duration: Option<Duration>,
    backend: Arc<BackendShared>,
    on_end: Arc<TrackEndHook>,
    native_loop: Arc<AtomicBool>,
    playing: bool,
    end_timer: Option<JoinHandle<()>>,
    gain: f32,
    ramp: Option<ScheduledRamp>,
}

impl SimulatedVoice {
    fn restart_end_timer(&mut self) {
        self.stop_end_timer();
        let Some(duration) = self.duration else {
            return;
        };

        let native_loop = Arc::clone(&self.native_loop);
        let on_end = Arc::clone(&self.on_end);
        self.end_timer = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(duration).await;
                if !native_loop.load(Ordering::Acquire) {
                    on_end.fire();
                    break;
                }
            }
        }));
    }

    fn stop_end_timer(&mut self) {
        if let Some(timer) = self.end_timer.take() {
            timer.abort();
        }
    }

    fn schedule(&mut self, values: Vec<f32>, duration: Duration) {
        self.ramp = Some(ScheduledRamp {
            values,
            start: Instant::now(),
            duration,
        });
        self.backend.record(self.channel_id, |p| p.scheduled_ramps += 1);
    }
}

impl Voice for SimulatedVoice {
    fn play(&mut self) -> Result<()> {
        self.playing = true;
        self.restart_end_timer();
        self.backend.record(self.channel_id, |p| {
            p.plays += 1;
            p.is_playing = true;
        });
        Ok(())
    }

    fn pause(&mut self) {
        self.playing = false;
        self.stop_end_timer();
        self.backend.record(self.channel_id, |p| p.is_playing = false);
    }

    fn rewind(&mut self) {
        if self.playing {
            self.restart_end_timer();
        }
    }

    fn set_native_loop(&mut self, enabled: bool) {
        self.native_loop.store(enabled, Ordering::Release);
        self.backend.record(self.channel_id, |p| p.native_loop = enabled);
    }

    fn set_gain(&mut self, gain: f32) {
        self.ramp = None;
        self.gain = gain;
        self.backend.record(self.channel_id, |p| p.gain_writes.push(gain));
    }

    fn gain(&self) -> f32 {
        match &self.ramp {
            Some(ramp) => ramp.value_now(),
            None => self.gain,
        }
    }

    fn automation(&mut self) -> Option<&mut dyn GainAutomation> {
        if self.backend.automation {
            Some(self)
        } else {
            None
        }
    }

    fn close(&mut self) {
        self.playing = false;
        self.stop_end_timer();
        self.backend.record(self.channel_id, |p| {
            p.closes += 1;
            p.is_playing = false;
        });
    }
}

impl GainAutomation for SimulatedVoice {
    fn cancel_scheduled(&mut self) {
        if let Some(ramp) = self.ramp.take() {
            self.gain = ramp.value_now();
        }
        self.backend.record(self.channel_id, |p| p.cancels += 1);
    }

    fn linear_ramp(&mut self, from: f32, to: f32, duration: Duration) -> Result<()> {
        self.schedule(vec![from, to], duration);
        Ok(())
    }

    fn value_curve(&mut self, values: &[f32], duration: Duration) -> Result<()> {
        if values.len() < 2 {
            return Err(Error::Backend("value curve needs at least two points".to_string()));
        }
        self.schedule(values.to_vec(), duration);
        Ok(())
    }
}

impl Drop for SimulatedVoice {
    fn drop(&mut self) {
        self.stop_end_timer();
    }
}
