//! Integration tests for the mixer engine facade: atmosphere persistence,
//! integrity checks, previews, scenes and shutdown

mod helpers;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use ambimix_common::config::MixerConfig;
use ambimix_common::Membership;
use ambimix_engine::audio::SimulatedBackend;
use ambimix_engine::{
    AtmosphereStore, CrossfadeOptions, Error, MemoryAtmosphereStore, MixerEngine, Scene,
};
use helpers::{atmosphere, TestMixer};

fn quick() -> CrossfadeOptions {
    CrossfadeOptions::over(Duration::from_millis(200))
}

#[test]
fn test_duplicate_atmosphere() {
    let mixer = TestMixer::new(&[1, 2]);
    let mut def = atmosphere("Forest", &[(1, 0.5), (2, 0.2)]);
    def.keywords = vec!["calm".to_string()];
    let original = mixer.save(def);

    let copy = mixer.engine.duplicate_atmosphere(original, "Forest (night)").unwrap();

    assert_ne!(copy, original);
    let stored = mixer.engine.store().load(copy).unwrap();
    assert_eq!(stored.name, "Forest (night)");
    assert_eq!(stored.id, Some(copy));
    assert_eq!(stored.keywords, vec!["calm".to_string()]);
    assert_eq!(stored.memberships.len(), 2);
}

#[test]
fn test_integrity_lists_unresolvable_memberships() {
    let mixer = TestMixer::new(&[1, 2, 3]);
    let id = mixer.save(atmosphere("Cave", &[(1, 0.5), (2, 0.5), (3, 0.5)]));
    assert!(mixer.engine.integrity(id).unwrap().is_intact());

    mixer.library.remove(2);
    let integrity = mixer.engine.integrity(id).unwrap();
    assert_eq!(integrity.atmosphere_id, id);
    assert_eq!(integrity.missing_ids, vec![2]);
}

#[test]
fn test_unknown_atmosphere() {
    let mixer = TestMixer::new(&[]);
    assert!(matches!(mixer.engine.preview(42), Err(Error::AtmosphereNotFound(42))));
    assert!(matches!(mixer.engine.integrity(42), Err(Error::AtmosphereNotFound(42))));
}

#[test]
fn test_invalid_definition_is_rejected() {
    let mixer = TestMixer::new(&[1]);
    let mut def = atmosphere("Loud", &[]);
    def.memberships.push(Membership::new(1, 1.5));
    assert!(matches!(
        mixer.engine.save_atmosphere(def),
        Err(Error::InvalidDefinition(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_load_unknown_atmosphere_is_error() {
    let mixer = TestMixer::new(&[]);
    let result = mixer.engine.load_atmosphere(5, quick()).await;
    assert!(matches!(result, Err(Error::AtmosphereNotFound(5))));
}

#[tokio::test(start_paused = true)]
async fn test_preview_has_no_side_effects() {
    let mixer = TestMixer::new(&[1, 2]);
    let id = mixer.save(atmosphere("Rain", &[(1, 0.5), (2, 0.5)]));

    let diff = mixer.engine.preview(id).unwrap();

    assert_eq!(diff.added_ids(), vec![1, 2]);
    assert!(mixer.engine.registry().is_empty());
    assert!(mixer.backend.probe(1).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_deleting_active_atmosphere_keeps_mix() {
    let mixer = TestMixer::new(&[1]);
    let id = mixer.save(atmosphere("Rain", &[(1, 0.5)]));
    mixer.engine.load_atmosphere(id, quick()).await.unwrap();
    assert_eq!(mixer.engine.active_atmosphere(), Some(id));

    mixer.engine.delete_atmosphere(id).unwrap();

    assert_eq!(mixer.engine.active_atmosphere(), None);
    assert!(mixer.channel(1).is_playing());
    assert!(matches!(
        mixer.engine.delete_atmosphere(id),
        Err(Error::AtmosphereNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_channels() {
    let mixer = TestMixer::new(&[1, 2]);
    let id = mixer.save(atmosphere("Rain", &[(1, 0.5), (2, 0.5)]));
    mixer.engine.load_atmosphere(id, quick()).await.unwrap();
    let rain = mixer.channel(1);

    mixer.engine.shutdown();

    assert!(mixer.engine.registry().is_empty());
    assert!(!rain.is_playing());
    assert_eq!(mixer.backend.probe(1).unwrap().closes, 1);
    assert_eq!(mixer.backend.probe(2).unwrap().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_engine_from_scene_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[[library]]
id = 1
location = "sounds/rain.ogg"
duration_ms = 30000

[[library]]
id = 2
location = "sounds/thunder.ogg"
duration_ms = 4000

[[atmospheres]]
id = 3
name = "Storm"
default_crossfade_ms = 400

[[atmospheres.memberships]]
channel_id = 1
volume = 0.7
is_looping = true

[[atmospheres.memberships]]
channel_id = 2
volume = 0.9
min_seconds = 10.0
max_seconds = 30.0
"#
    )
    .unwrap();

    let scene = Scene::from_file(file.path()).unwrap();
    let store = Arc::new(MemoryAtmosphereStore::new());
    for def in scene.atmospheres.iter().cloned() {
        store.save(def).unwrap();
    }
    let engine = MixerEngine::new(
        MixerConfig::default(),
        Arc::new(SimulatedBackend::new()),
        Arc::new(scene.catalog()),
        store,
    );

    let report = engine
        .load_atmosphere(3, CrossfadeOptions::default())
        .await
        .unwrap();

    assert!(report.is_completed());
    let thunder = engine.registry().get(2).unwrap();
    assert!(thunder.is_waiting_for_delay());
    assert_eq!(thunder.volume(), 0.9);
    assert!(engine.registry().get(1).unwrap().is_looping());
}

#[tokio::test(start_paused = true)]
async fn test_channel_lookup() {
    let mixer = TestMixer::new(&[1]);
    assert!(matches!(mixer.engine.channel(1), Err(Error::ChannelNotFound(1))));

    let id = mixer.save(atmosphere("Rain", &[(1, 0.5)]));
    mixer.engine.load_atmosphere(id, quick()).await.unwrap();
    assert_eq!(mixer.engine.channel(1).unwrap().id(), 1);
}
