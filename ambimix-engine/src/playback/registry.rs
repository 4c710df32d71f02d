//! Channel registry
//!
//! Owns every channel the mixer has created, keyed by channel id. Channels
//! are created lazily the first time an atmosphere needs them and released
//! when removed or on shutdown.
//!
//! Mutations go through a single writer. A crossfade holds the writer while
//! it diffs the live mix and issues its channel commands, so an `add` or
//! `remove` (or another crossfade) never interleaves with that section.
//! The writer is not held while fades run.

use std::collections::BTreeMap;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use ambimix_common::ChannelId;
use tracing::{debug, info};

use crate::atmosphere::LiveChannel;
use crate::audio::{SourceHandle, SourceResolver};
use crate::error::{Error, Result};
use crate::playback::channel::{Channel, ChannelContext};

/// Live channels by id
pub struct ChannelRegistry {
    channels: RwLock<BTreeMap<ChannelId, Channel>>,
    writer: Mutex<()>,
    resolver: Arc<dyn SourceResolver>,
    context: ChannelContext,
}

/// Exclusive right to change the set of channels
///
/// Obtained from `ChannelRegistry::writer`; dropping it lets the next
/// writer in. Never hold it across an `.await`.
pub struct RegistryWriter<'a> {
    registry: &'a ChannelRegistry,
    _guard: MutexGuard<'a, ()>,
}

impl RegistryWriter<'_> {
    /// Create a channel for `channel_id`, replacing (and releasing) any
    /// existing one
    pub fn add(&self, channel_id: ChannelId) -> Result<Channel> {
        let registry = self.registry;
        let source = registry.resolve(channel_id)?;
        let channel = Channel::new(source, registry.context.clone());

        let previous = registry.write().insert(channel_id, channel.clone());
        if let Some(previous) = previous {
            previous.release();
        }
        debug!(channel_id, "Channel added");
        Ok(channel)
    }

    /// Existing channel for `channel_id`, or a newly created one
    pub fn ensure(&self, channel_id: ChannelId) -> Result<Channel> {
        let registry = self.registry;
        if let Some(channel) = registry.get(channel_id) {
            return Ok(channel);
        }

        let source = registry.resolve(channel_id)?;
        let channel = Channel::new(source, registry.context.clone());
        registry.write().insert(channel_id, channel.clone());
        debug!(channel_id, "Channel created");
        Ok(channel)
    }

    /// Remove and release a channel
    pub fn remove(&self, channel_id: ChannelId) -> Option<Channel> {
        let removed = self.registry.write().remove(&channel_id);
        if let Some(channel) = &removed {
            channel.release();
            debug!(channel_id, "Channel removed");
        }
        removed
    }

    pub fn get(&self, channel_id: ChannelId) -> Option<Channel> {
        self.registry.get(channel_id)
    }

    pub fn live_snapshot(&self) -> Vec<LiveChannel> {
        self.registry.live_snapshot()
    }

    pub fn resolver(&self) -> &Arc<dyn SourceResolver> {
        &self.registry.resolver
    }
}

impl ChannelRegistry {
    pub fn new(resolver: Arc<dyn SourceResolver>, context: ChannelContext) -> Self {
        Self {
            channels: RwLock::new(BTreeMap::new()),
            writer: Mutex::new(()),
            resolver,
            context,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ChannelId, Channel>> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ChannelId, Channel>> {
        self.channels.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, channel_id: ChannelId) -> Result<SourceHandle> {
        self.resolver
            .resolve(channel_id)
            .ok_or(Error::MissingSource(channel_id))
    }

    /// Take the single writer, blocking until the current one is done
    pub fn writer(&self) -> RegistryWriter<'_> {
        RegistryWriter {
            registry: self,
            _guard: self.writer.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Library lookup used to create channels
    pub fn resolver(&self) -> &Arc<dyn SourceResolver> {
        &self.resolver
    }

    pub fn context(&self) -> &ChannelContext {
        &self.context
    }

    pub fn add(&self, channel_id: ChannelId) -> Result<Channel> {
        self.writer().add(channel_id)
    }

    pub fn ensure(&self, channel_id: ChannelId) -> Result<Channel> {
        self.writer().ensure(channel_id)
    }

    pub fn get(&self, channel_id: ChannelId) -> Option<Channel> {
        self.read().get(&channel_id).cloned()
    }

    pub fn remove(&self, channel_id: ChannelId) -> Option<Channel> {
        self.writer().remove(channel_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Channels currently playing or waiting for a delayed start, with
    /// their logical volume
    pub fn live_snapshot(&self) -> Vec<LiveChannel> {
        self.read()
            .values()
            .filter(|c| c.is_playing())
            .map(|c| LiveChannel {
                channel_id: c.id(),
                volume: c.volume(),
            })
            .collect()
    }

    /// Release every channel and empty the registry
    pub fn shutdown(&self) {
        let _writer = self.writer();
        let channels = std::mem::take(&mut *self.write());
        let count = channels.len();
        for channel in channels.into_values() {
            channel.release();
        }
        info!(count, "Channel registry shut down");
    }
}
