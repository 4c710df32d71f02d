//! Channel playback and volume ramps

pub mod channel;
pub mod fade_scheduler;
pub mod registry;

pub use channel::{
    Channel, ChannelContext, ChannelSettings, ChannelSnapshot, FadeHandle, FadeOptions,
    FadeOutcome,
};
pub use fade_scheduler::{FadeOperation, FadeScheduler, RampPlan, RampStrategy};
pub use registry::{ChannelRegistry, RegistryWriter};
