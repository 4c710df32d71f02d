//! Event types for the Ambimix event system
//!
//! Provides the shared event definitions and the EventBus used by the
//! channels and the crossfade orchestrator.

mod state_types;

pub use state_types::{ChannelPlaybackState, TransitionPhase};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{AtmosphereId, ChannelId};

/// Ambimix event types
///
/// Events are broadcast via EventBus and can be serialized for UI
/// consumers. Transition events carry both the transition id (unique per
/// `crossfade_to` call) and the target atmosphere id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MixerEvent {
    /// Crossfade toward an atmosphere started
    TransitionStarted {
        transition_id: Uuid,
        atmosphere_id: Option<AtmosphereId>,
        /// Crossfade duration in milliseconds
        duration_ms: u64,
        curve: crate::FadeCurve,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Aggregate crossfade progress
    ///
    /// Emitted on every orchestrator tick while the transition is in flight.
    TransitionProgress {
        transition_id: Uuid,
        atmosphere_id: Option<AtmosphereId>,
        /// Mean fraction of elapsed fade time across participating channels (0.0-1.0)
        progress: f32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Crossfade progress reached the almost-complete threshold
    ///
    /// Emitted at most once per transition.
    TransitionAlmostComplete {
        transition_id: Uuid,
        atmosphere_id: Option<AtmosphereId>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Every participating fade settled and the transition was not superseded
    TransitionCompleted {
        transition_id: Uuid,
        atmosphere_id: Option<AtmosphereId>,
        /// Memberships that could not be resolved to a playable source
        missing_ids: Vec<ChannelId>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A step of a transition failed
    ///
    /// The transition keeps settling its other channels.
    TransitionError {
        transition_id: Option<Uuid>,
        atmosphere_id: Option<AtmosphereId>,
        channel_id: Option<ChannelId>,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Channel playback state changed
    ///
    /// Mirrors the channel state for UI consumers.
    ChannelStateChanged {
        channel_id: ChannelId,
        is_playing: bool,
        is_waiting_for_delay: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Channel reached the end of its source
    ///
    /// Emitted before any loop or delay handling.
    ChannelEnded {
        channel_id: ChannelId,
        is_looping: bool,
        has_delay: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl MixerEvent {
    /// Get event type as string
    pub fn event_type(&self) -> &str {
        match self {
            MixerEvent::TransitionStarted { .. } => "TransitionStarted",
            MixerEvent::TransitionProgress { .. } => "TransitionProgress",
            MixerEvent::TransitionAlmostComplete { .. } => "TransitionAlmostComplete",
            MixerEvent::TransitionCompleted { .. } => "TransitionCompleted",
            MixerEvent::TransitionError { .. } => "TransitionError",
            MixerEvent::ChannelStateChanged { .. } => "ChannelStateChanged",
            MixerEvent::ChannelEnded { .. } => "ChannelEnded",
        }
    }

    /// Transition this event belongs to, if any
    pub fn transition_id(&self) -> Option<Uuid> {
        match self {
            MixerEvent::TransitionStarted { transition_id, .. }
            | MixerEvent::TransitionProgress { transition_id, .. }
            | MixerEvent::TransitionAlmostComplete { transition_id, .. }
            | MixerEvent::TransitionCompleted { transition_id, .. } => Some(*transition_id),
            MixerEvent::TransitionError { transition_id, .. } => *transition_id,
            MixerEvent::ChannelStateChanged { .. } | MixerEvent::ChannelEnded { .. } => None,
        }
    }

    /// Channel this event belongs to, if any
    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            MixerEvent::ChannelStateChanged { channel_id, .. }
            | MixerEvent::ChannelEnded { channel_id, .. } => Some(*channel_id),
            MixerEvent::TransitionError { channel_id, .. } => *channel_id,
            _ => None,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// Cloning the bus is cheap; every clone publishes to the same subscribers.
///
/// # Examples
///
/// ```
/// use ambimix_common::events::{EventBus, MixerEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(MixerEvent::ChannelStateChanged {
///     channel_id: 7,
///     is_playing: true,
///     is_waiting_for_delay: false,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MixerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per subscriber before
    /// the oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<MixerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: MixerEvent,
    ) -> Result<usize, broadcast::error::SendError<MixerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MixerEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_event(channel_id: ChannelId) -> MixerEvent {
        MixerEvent::ChannelStateChanged {
            channel_id,
            is_playing: true,
            is_waiting_for_delay: false,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(10);
        assert!(bus.emit(state_event(1)).is_err());
        // lossy variant must not panic
        bus.emit_lossy(state_event(1));
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_each_event() {
        let bus = EventBus::new(10);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.emit(state_event(4)).unwrap(), 2);

        assert_eq!(a.recv().await.unwrap().channel_id(), Some(4));
        assert_eq!(b.recv().await.unwrap().channel_id(), Some(4));
    }

    #[test]
    fn test_clone_shares_subscribers() {
        let bus = EventBus::new(10);
        let clone = bus.clone();
        let mut rx = bus.subscribe();
        clone.emit_lossy(state_event(2));
        assert!(rx.try_recv().is_ok());
        assert_eq!(clone.capacity(), 10);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = MixerEvent::ChannelEnded {
            channel_id: 3,
            is_looping: true,
            has_delay: false,
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ChannelEnded");
        assert_eq!(json["channel_id"], 3);
        assert_eq!(event.event_type(), "ChannelEnded");
        assert_eq!(event.transition_id(), None);
    }

    #[test]
    fn test_transition_id_accessor() {
        let id = Uuid::new_v4();
        let event = MixerEvent::TransitionProgress {
            transition_id: id,
            atmosphere_id: Some(5),
            progress: 0.5,
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(event.transition_id(), Some(id));
        assert_eq!(event.channel_id(), None);
    }
}
