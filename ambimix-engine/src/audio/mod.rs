//! Audio backend seam and the simulated backend

pub mod backend;
pub mod simulated;

pub use backend::{AudioBackend, GainAutomation, SourceHandle, SourceResolver, TrackEndHook, Voice};
pub use simulated::{SimulatedBackend, VoiceProbe};
