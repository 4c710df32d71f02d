//! Mixer engine facade
//!
//! Bundles configuration, the event bus, the channel registry, the
//! crossfade orchestrator and the atmosphere store behind one handle.
//! Share it as `Arc<MixerEngine>`; every method takes `&self`.

use std::sync::Arc;

use ambimix_common::config::MixerConfig;
use ambimix_common::events::{EventBus, MixerEvent, TransitionPhase};
use ambimix_common::models::AtmosphereIntegrity;
use ambimix_common::{AtmosphereDefinition, AtmosphereId, ChannelId};
use tokio::sync::broadcast;
use tracing::info;

use crate::atmosphere::diff::compute_diff_with_epsilon;
use crate::atmosphere::{
    AtmosphereDiff, AtmosphereStore, CrossfadeOptions, CrossfadeOrchestrator, TransitionReport,
};
use crate::audio::{AudioBackend, SourceResolver};
use crate::error::{Error, Result};
use crate::playback::{Channel, ChannelContext, ChannelRegistry};

pub struct MixerEngine {
    config: MixerConfig,
    events: EventBus,
    registry: ChannelRegistry,
    orchestrator: CrossfadeOrchestrator,
    store: Arc<dyn AtmosphereStore>,
}

impl MixerEngine {
    pub fn new(
        config: MixerConfig,
        backend: Arc<dyn AudioBackend>,
        resolver: Arc<dyn SourceResolver>,
        store: Arc<dyn AtmosphereStore>,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        let context = ChannelContext::new(backend, events.clone())
            .with_timing(config.channel_fade(), config.fade_settle_margin());
        let registry = ChannelRegistry::new(resolver, context);
        let orchestrator = CrossfadeOrchestrator::new(events.clone(), config.clone());

        Self {
            config,
            events,
            registry,
            orchestrator,
            store,
        }
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to channel and transition events
    pub fn subscribe(&self) -> broadcast::Receiver<MixerEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &CrossfadeOrchestrator {
        &self.orchestrator
    }

    pub fn store(&self) -> &Arc<dyn AtmosphereStore> {
        &self.store
    }

    /// Channel already in the mix
    pub fn channel(&self, channel_id: ChannelId) -> Result<Channel> {
        self.registry
            .get(channel_id)
            .ok_or(Error::ChannelNotFound(channel_id))
    }

    /// Crossfade to a stored atmosphere
    pub async fn load_atmosphere(
        &self,
        id: AtmosphereId,
        options: CrossfadeOptions,
    ) -> Result<TransitionReport> {
        let definition = self.store.load(id)?;
        info!(atmosphere_id = id, name = %definition.name, "Loading atmosphere");
        Ok(self.crossfade_to(&definition, options).await)
    }

    /// Crossfade to an arbitrary (possibly unsaved) definition
    pub async fn crossfade_to(
        &self,
        definition: &AtmosphereDefinition,
        options: CrossfadeOptions,
    ) -> TransitionReport {
        self.orchestrator
            .crossfade_to(definition, &self.registry, options)
            .await
    }

    /// What loading a stored atmosphere would change
    pub fn preview(&self, id: AtmosphereId) -> Result<AtmosphereDiff> {
        let definition = self.store.load(id)?;
        Ok(self.preview_definition(&definition))
    }

    pub fn preview_definition(&self, definition: &AtmosphereDefinition) -> AtmosphereDiff {
        compute_diff_with_epsilon(
            definition,
            &self.registry.live_snapshot(),
            self.registry.resolver().as_ref(),
            self.config.volume_epsilon,
        )
    }

    pub fn save_atmosphere(&self, definition: AtmosphereDefinition) -> Result<AtmosphereId> {
        self.store.save(definition)
    }

    /// Delete a stored atmosphere; the live mix keeps playing
    pub fn delete_atmosphere(&self, id: AtmosphereId) -> Result<()> {
        self.store.delete(id)?;
        if self.orchestrator.active_atmosphere() == Some(id) {
            self.orchestrator.clear_active_atmosphere();
        }
        Ok(())
    }

    /// Store a copy of an atmosphere under a new name and id
    pub fn duplicate_atmosphere(&self, id: AtmosphereId, new_name: &str) -> Result<AtmosphereId> {
        let mut copy = self.store.load(id)?;
        copy.id = None;
        copy.name = new_name.to_string();
        let new_id = self.store.save(copy)?;
        info!(atmosphere_id = id, new_id, "Atmosphere duplicated");
        Ok(new_id)
    }

    /// Memberships of an atmosphere whose sources cannot be resolved
    pub fn integrity(&self, id: AtmosphereId) -> Result<AtmosphereIntegrity> {
        let definition = self.store.load(id)?;
        let resolver = self.registry.resolver();
        let missing_ids = definition
            .channel_ids()
            .filter(|&channel_id| !resolver.is_resolvable(channel_id))
            .collect();
        Ok(AtmosphereIntegrity {
            atmosphere_id: id,
            missing_ids,
        })
    }

    /// Atmosphere of the last completed transition
    pub fn active_atmosphere(&self) -> Option<AtmosphereId> {
        self.orchestrator.active_atmosphere()
    }

    pub fn transition_phase(&self) -> TransitionPhase {
        self.orchestrator.phase()
    }

    /// Supersede the in-flight transition, if any
    pub fn cancel_transition(&self) -> bool {
        self.orchestrator.cancel_current()
    }

    /// Cancel any transition and release every channel
    pub fn shutdown(&self) {
        self.orchestrator.cancel_current();
        self.registry.shutdown();
        info!("Mixer engine shut down");
    }
}
