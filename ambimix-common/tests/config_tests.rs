//! Configuration resolution tests
//!
//! Tests that manipulate AMBIMIX_CONFIG are marked with #[serial]
//! so they run sequentially, not in parallel.

use std::env;
use std::io::Write;

use ambimix_common::config::{MixerConfig, CONFIG_ENV_VAR};
use ambimix_common::{Error, FadeCurve};
use serial_test::serial;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_cli_path_has_priority_over_env() {
    let env_file = write_config("default_crossfade_ms = 1111");
    let cli_file = write_config("default_crossfade_ms = 2222");
    env::set_var(CONFIG_ENV_VAR, env_file.path());

    let config = MixerConfig::load(Some(cli_file.path())).unwrap();
    assert_eq!(config.default_crossfade_ms, 2222);

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_path_is_used_without_cli() {
    let env_file = write_config(
        r#"
        default_curve = "equal_power"
        progress_interval_ms = 25
        "#,
    );
    env::set_var(CONFIG_ENV_VAR, env_file.path());

    let config = MixerConfig::load(None).unwrap();
    assert_eq!(config.default_curve, FadeCurve::EqualPower);
    assert_eq!(config.progress_interval_ms, 25);

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_missing_explicit_file_is_error() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    let result = MixerConfig::load(Some(&missing));
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
#[serial]
fn test_malformed_file_reports_config_error() {
    env::remove_var(CONFIG_ENV_VAR);
    let file = write_config("event_capacity = [1, 2]");

    let result = MixerConfig::load(Some(file.path()));
    assert!(matches!(result, Err(Error::Config(_))));
}
