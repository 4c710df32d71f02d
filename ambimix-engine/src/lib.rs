//! # Ambimix Engine Library (ambimix-engine)
//!
//! Channel playback and atmosphere crossfading.
//!
//! **Purpose:** Play many independently looped or randomly re-triggered
//! sources, and move the whole mix from one atmosphere to another with a
//! coordinated, cancellable crossfade.
//!
//! **Architecture:** channels own their playback resource and fade
//! automation; the orchestrator diffs a target atmosphere against the live
//! channel set and drives every affected channel's fade concurrently.
//! Decoding and output are delegated to an `AudioBackend`.

pub mod atmosphere;
pub mod audio;
pub mod engine;
pub mod error;
pub mod library;
pub mod playback;
pub mod scene;

pub use atmosphere::{
    compute_diff, AtmosphereDiff, AtmosphereStore, CrossfadeOptions, CrossfadeOrchestrator,
    MemoryAtmosphereStore, TransitionOutcome, TransitionReport,
};
pub use engine::MixerEngine;
pub use error::{Error, Result};
pub use library::LibraryCatalog;
pub use playback::{Channel, ChannelRegistry, FadeOptions, FadeOutcome};
pub use scene::Scene;
