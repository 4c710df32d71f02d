//! Scene files
//!
//! A scene is a TOML document listing library entries and atmosphere
//! definitions. The binary uses it to populate the library catalog and
//! atmosphere store.
//!
//! ```toml
//! [[library]]
//! id = 1
//! location = "sounds/rain.ogg"
//! duration_ms = 42000
//!
//! [[atmospheres]]
//! id = 1
//! name = "Rainy Forest"
//! default_crossfade_ms = 3000
//! default_curve = "equal_power"
//!
//! [[atmospheres.memberships]]
//! channel_id = 1
//! volume = 0.6
//! is_looping = true
//! ```

use std::path::Path;
use std::time::Duration;

use ambimix_common::{AtmosphereDefinition, ChannelId};
use serde::{Deserialize, Serialize};

use crate::audio::SourceHandle;
use crate::error::Result;
use crate::library::LibraryCatalog;

/// One library entry of a scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub id: ChannelId,
    pub location: String,
    /// Simulated length of one play-through
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl LibraryEntry {
    pub fn source(&self) -> SourceHandle {
        let source = SourceHandle::new(self.id, self.location.clone());
        match self.duration_ms {
            Some(ms) => source.with_duration(Duration::from_millis(ms)),
            None => source,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub library: Vec<LibraryEntry>,
    #[serde(default)]
    pub atmospheres: Vec<AtmosphereDefinition>,
}

impl Scene {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let scene = toml::from_str(text).map_err(ambimix_common::Error::from)?;
        Ok(scene)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(ambimix_common::Error::from)?;
        Self::from_toml_str(&text)
    }

    /// Library catalog holding every entry of the scene
    pub fn catalog(&self) -> LibraryCatalog {
        self.library.iter().map(LibraryEntry::source).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SourceResolver;

    const SCENE: &str = r#"
        [[library]]
        id = 1
        location = "sounds/rain.ogg"
        duration_ms = 42000

        [[library]]
        id = 2
        location = "sounds/birds.ogg"

        [[atmospheres]]
        id = 7
        name = "Rainy Forest"
        default_curve = "equal_power"

        [[atmospheres.memberships]]
        channel_id = 1
        volume = 0.6
        is_looping = true

        [[atmospheres.memberships]]
        channel_id = 2
        min_seconds = 5.0
        max_seconds = 20.0
    "#;

    #[test]
    fn test_parse_scene() {
        let scene = Scene::from_toml_str(SCENE).unwrap();
        assert_eq!(scene.library.len(), 2);
        assert_eq!(
            scene.library[0].source().duration,
            Some(Duration::from_millis(42000))
        );

        let forest = &scene.atmospheres[0];
        assert_eq!(forest.id, Some(7));
        assert_eq!(forest.memberships.len(), 2);
        assert_eq!(forest.memberships[1].volume, 0.5);
        assert_eq!(forest.memberships[1].max_seconds, 20.0);
    }

    #[test]
    fn test_catalog_resolves_entries() {
        let catalog = Scene::from_toml_str(SCENE).unwrap().catalog();
        assert_eq!(catalog.resolve(2).unwrap().location, "sounds/birds.ogg");
        assert!(catalog.resolve(3).is_none());
    }

    #[test]
    fn test_bad_scene_is_error() {
        assert!(Scene::from_toml_str("library = 3").is_err());
    }
}
