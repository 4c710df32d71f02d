//! Atmosphere data model
//!
//! An atmosphere is a named target configuration of channels: which
//! sources play, at what volume, and how they loop. Definitions are
//! opaque records handed to and from the persistence collaborator.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Error, FadeCurve, Result};

/// Stable identity of a channel (the library entry id of its source)
pub type ChannelId = i64;

/// Identity of a stored atmosphere definition
pub type AtmosphereId = i64;

/// Default crossfade duration for new atmospheres
pub const DEFAULT_CROSSFADE_MS: u64 = 2500;

fn default_volume() -> f32 {
    0.5
}

fn default_crossfade_ms() -> u64 {
    DEFAULT_CROSSFADE_MS
}

/// One channel's settings inside an atmosphere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    /// Channel (library entry) this membership refers to
    pub channel_id: ChannelId,
    /// Target volume (0.0-1.0)
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub is_looping: bool,
    #[serde(default)]
    pub is_muted: bool,
    /// Minimum random delay between loop iterations, in seconds (0 = disabled)
    #[serde(default)]
    pub min_seconds: f64,
    /// Maximum random delay between loop iterations, in seconds (0 = disabled)
    #[serde(default)]
    pub max_seconds: f64,
}

impl Membership {
    /// Membership with the given volume and no loop, mute or delay settings
    pub fn new(channel_id: ChannelId, volume: f32) -> Self {
        Self {
            channel_id,
            volume,
            is_looping: false,
            is_muted: false,
            min_seconds: 0.0,
            max_seconds: 0.0,
        }
    }

    pub fn looping(mut self, is_looping: bool) -> Self {
        self.is_looping = is_looping;
        self
    }

    pub fn muted(mut self, is_muted: bool) -> Self {
        self.is_muted = is_muted;
        self
    }

    /// Set the random delay window, in seconds
    pub fn with_delay(mut self, min_seconds: f64, max_seconds: f64) -> Self {
        self.min_seconds = min_seconds;
        self.max_seconds = max_seconds;
        self
    }
}

/// A stored atmosphere: metadata plus ordered channel memberships
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtmosphereDefinition {
    /// None until the definition has been saved
    #[serde(default)]
    pub id: Option<AtmosphereId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Preferred crossfade duration when loading this atmosphere
    #[serde(default = "default_crossfade_ms")]
    pub default_crossfade_ms: u64,
    /// Preferred fade curve when loading this atmosphere
    #[serde(default, alias = "fade_curve")]
    pub default_curve: FadeCurve,
    /// Ordered channel memberships; channel ids are unique
    #[serde(default, alias = "sounds")]
    pub memberships: Vec<Membership>,
}

impl AtmosphereDefinition {
    /// Create an unsaved, empty atmosphere with default crossfade settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: String::new(),
            category: String::new(),
            subcategory: String::new(),
            keywords: Vec::new(),
            default_crossfade_ms: DEFAULT_CROSSFADE_MS,
            default_curve: FadeCurve::default(),
            memberships: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: AtmosphereId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_membership(mut self, membership: Membership) -> Self {
        self.memberships.push(membership);
        self
    }

    /// Look up the membership for a channel
    pub fn membership(&self, channel_id: ChannelId) -> Option<&Membership> {
        self.memberships.iter().find(|m| m.channel_id == channel_id)
    }

    /// Whether the channel is part of this atmosphere
    pub fn contains(&self, channel_id: ChannelId) -> bool {
        self.membership(channel_id).is_some()
    }

    /// Channel ids in membership order
    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.memberships.iter().map(|m| m.channel_id)
    }

    /// Check definition invariants before persisting
    ///
    /// Channel ids must be unique, volumes must lie in [0, 1] and delay
    /// windows must be non-negative.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("atmosphere name is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for m in &self.memberships {
            if !seen.insert(m.channel_id) {
                return Err(Error::InvalidInput(format!(
                    "channel {} appears more than once in atmosphere {:?}",
                    m.channel_id, self.name
                )));
            }
            if !(0.0..=1.0).contains(&m.volume) {
                return Err(Error::InvalidInput(format!(
                    "channel {} volume {} outside 0.0-1.0",
                    m.channel_id, m.volume
                )));
            }
            if m.min_seconds < 0.0 || m.max_seconds < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "channel {} has a negative delay window",
                    m.channel_id
                )));
            }
        }
        Ok(())
    }
}

/// Memberships of an atmosphere whose sources can no longer be resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtmosphereIntegrity {
    pub atmosphere_id: AtmosphereId,
    pub missing_ids: Vec<ChannelId>,
}

impl AtmosphereIntegrity {
    pub fn is_intact(&self) -> bool {
        self.missing_ids.is_empty()
    }
}
