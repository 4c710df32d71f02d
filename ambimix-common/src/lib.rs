//! # Ambimix Common Library
//!
//! Shared code for the Ambimix mixer crates including:
//! - Atmosphere and membership models
//! - Event types (MixerEvent enum) and the EventBus
//! - Configuration loading
//! - Fade curve definitions and calculations

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod models;

pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
pub use models::{AtmosphereDefinition, AtmosphereId, ChannelId, Membership};
