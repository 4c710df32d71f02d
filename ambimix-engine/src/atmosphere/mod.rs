//! Atmospheres: diffing, crossfade orchestration and persistence

pub mod diff;
pub mod orchestrator;
pub mod store;

pub use diff::{compute_diff, AtmosphereDiff, LiveChannel, RemovedChannel, VolumeChange};
pub use orchestrator::{
    CrossfadeOptions, CrossfadeOrchestrator, TransitionOutcome, TransitionReport,
};
pub use store::{AtmosphereStore, MemoryAtmosphereStore};
