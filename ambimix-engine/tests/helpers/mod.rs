//! Test helpers for ambimix-engine integration tests
//!
//! - TestMixer: engine wired to a simulated backend and an in-memory library
//! - EventLog: drains the event bus for assertions

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ambimix_common::config::MixerConfig;
use ambimix_common::events::MixerEvent;
use ambimix_common::{AtmosphereDefinition, AtmosphereId, ChannelId, Membership};
use ambimix_engine::audio::{SimulatedBackend, SourceHandle};
use ambimix_engine::playback::{Channel, ChannelContext};
use ambimix_engine::{LibraryCatalog, MemoryAtmosphereStore, MixerEngine};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Engine plus handles on its simulated collaborators
pub struct TestMixer {
    pub engine: Arc<MixerEngine>,
    pub backend: SimulatedBackend,
    pub library: Arc<LibraryCatalog>,
}

impl TestMixer {
    /// Mixer with a library entry for every id and a stepping backend
    pub fn new(ids: &[ChannelId]) -> Self {
        Self::with_backend(ids, SimulatedBackend::new())
    }

    pub fn with_backend(ids: &[ChannelId], backend: SimulatedBackend) -> Self {
        let library = Arc::new(LibraryCatalog::new());
        for &id in ids {
            library.insert(SourceHandle::new(id, format!("sounds/{id}.ogg")));
        }

        let engine = Arc::new(MixerEngine::new(
            MixerConfig::default(),
            Arc::new(backend.clone()),
            library.clone(),
            Arc::new(MemoryAtmosphereStore::new()),
        ));

        Self {
            engine,
            backend,
            library,
        }
    }

    /// Save a definition, returning its id
    pub fn save(&self, definition: AtmosphereDefinition) -> AtmosphereId {
        self.engine
            .save_atmosphere(definition)
            .expect("atmosphere should save")
    }

    pub fn channel(&self, id: ChannelId) -> Channel {
        self.engine
            .registry()
            .get(id)
            .unwrap_or_else(|| panic!("channel {id} not in registry"))
    }
}

/// Atmosphere with plain memberships
pub fn atmosphere(name: &str, memberships: &[(ChannelId, f32)]) -> AtmosphereDefinition {
    memberships
        .iter()
        .fold(AtmosphereDefinition::new(name), |def, &(id, volume)| {
            def.with_membership(Membership::new(id, volume))
        })
}

/// Standalone channel with its own event bus
pub fn standalone_channel(
    backend: &SimulatedBackend,
    source: SourceHandle,
) -> (Channel, broadcast::Receiver<MixerEvent>) {
    let events = ambimix_common::events::EventBus::new(256);
    let rx = events.subscribe();
    let ctx = ChannelContext::new(Arc::new(backend.clone()), events);
    (Channel::new(source, ctx), rx)
}

pub fn source(id: ChannelId, duration_ms: Option<u64>) -> SourceHandle {
    let source = SourceHandle::new(id, format!("sounds/{id}.ogg"));
    match duration_ms {
        Some(ms) => source.with_duration(Duration::from_millis(ms)),
        None => source,
    }
}

/// Everything received so far on an event subscription
pub struct EventLog {
    pub events: Vec<MixerEvent>,
}

impl EventLog {
    pub fn drain(rx: &mut broadcast::Receiver<MixerEvent>) -> Self {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        Self { events }
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn of_type(&self, event_type: &str) -> Vec<&MixerEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    pub fn for_transition(&self, id: Uuid) -> Vec<&MixerEvent> {
        self.events
            .iter()
            .filter(|e| e.transition_id() == Some(id))
            .collect()
    }

    /// Position of the first event matching `pred`
    pub fn position(&self, pred: impl Fn(&MixerEvent) -> bool) -> Option<usize> {
        self.events.iter().position(pred)
    }

    /// Progress values of one transition, in order
    pub fn progress(&self, id: Uuid) -> Vec<f32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                MixerEvent::TransitionProgress {
                    transition_id,
                    progress,
                    ..
                } if *transition_id == id => Some(*progress),
                _ => None,
            })
            .collect()
    }
}
