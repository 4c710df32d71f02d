//! State enumerations shared by channels and transitions

use serde::{Deserialize, Serialize};

/// Channel playback state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPlaybackState {
    /// Not playing; playback resource released
    #[default]
    Stopped,
    /// Source audibly playing
    Playing,
    /// Meant to be playing, silent until the random delay timer fires
    WaitingForDelay,
}

impl ChannelPlaybackState {
    /// Playing or waiting for the next delayed start
    pub fn is_active(&self) -> bool {
        !matches!(self, ChannelPlaybackState::Stopped)
    }
}

impl std::fmt::Display for ChannelPlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelPlaybackState::Stopped => write!(f, "Stopped"),
            ChannelPlaybackState::Playing => write!(f, "Playing"),
            ChannelPlaybackState::WaitingForDelay => write!(f, "WaitingForDelay"),
        }
    }
}

/// Lifecycle of one crossfade transition
///
/// Idle → Starting → InProgress → {Completed | Cancelled | Failed}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPhase {
    #[default]
    Idle,
    /// Diff computed, channel commands being issued
    Starting,
    /// Waiting for participating fades to settle
    InProgress,
    Completed,
    /// Superseded by a newer transition
    Cancelled,
    /// Every participating channel failed
    Failed,
}

impl TransitionPhase {
    /// Whether the transition reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransitionPhase::Completed | TransitionPhase::Cancelled | TransitionPhase::Failed
        )
    }
}

impl std::fmt::Display for TransitionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionPhase::Idle => write!(f, "Idle"),
            TransitionPhase::Starting => write!(f, "Starting"),
            TransitionPhase::InProgress => write!(f, "InProgress"),
            TransitionPhase::Completed => write!(f, "Completed"),
            TransitionPhase::Cancelled => write!(f, "Cancelled"),
            TransitionPhase::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_state_activity() {
        assert!(!ChannelPlaybackState::Stopped.is_active());
        assert!(ChannelPlaybackState::Playing.is_active());
        assert!(ChannelPlaybackState::WaitingForDelay.is_active());
    }

    #[test]
    fn test_transition_phase_terminal() {
        assert!(!TransitionPhase::Idle.is_terminal());
        assert!(!TransitionPhase::InProgress.is_terminal());
        assert!(TransitionPhase::Cancelled.is_terminal());
        assert_eq!(TransitionPhase::InProgress.to_string(), "InProgress");
    }
}
