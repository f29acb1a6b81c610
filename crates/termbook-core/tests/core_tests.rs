use std::fs;
use tempfile::TempDir;

use termbook_core::config::{expand_path, Config, Settings, DEFAULT_COLLECTIONS};
use termbook_core::Error;

#[test]
fn defaults_apply_without_config_files() {
    let tmp = TempDir::new().unwrap();
    let config = Config::load_from(tmp.path(), "none").expect("load");
    let settings = config.settings().expect("settings");

    assert_eq!(settings.window.record_height_px, 45);
    assert_eq!(settings.window.overscan, 2);
    assert_eq!(settings.store.collections, DEFAULT_COLLECTIONS.map(String::from).to_vec());
    assert_eq!(settings.cache.tag_prefix, "terminology-dictionary");
}

#[test]
fn env_specific_file_overrides_base_file() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::write(
        dir.join("config.toml"),
        "[window]\nrecord_height_px = 30\noverscan = 3\n\n[store]\ncollections = [\"bio\", \"phys\"]\n",
    )
    .unwrap();
    fs::write(dir.join("config.test.toml"), "[window]\nrecord_height_px = 60\n").unwrap();

    let config = Config::load_from(dir, "test").expect("load");
    let settings = config.settings().expect("settings");
    assert_eq!(settings.window.record_height_px, 60, "env file wins");
    assert_eq!(settings.window.overscan, 3, "untouched keys come from config.toml");
    assert_eq!(settings.store.collections, vec!["bio".to_string(), "phys".to_string()]);

    let height: u32 = config.get("window.record_height_px").expect("get");
    assert_eq!(height, 60);
}

#[test]
fn zero_record_height_is_rejected() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("config.toml"), "[window]\nrecord_height_px = 0\n").unwrap();
    let err = Config::load_from(tmp.path(), "none").err().expect("must fail");
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn duplicate_or_invalid_collections_are_rejected() {
    let mut settings = Settings::default();
    settings.store.collections = vec!["bio".into(), "bio".into()];
    assert!(settings.validate().is_err());

    settings.store.collections = vec!["bio".into(), "no spaces".into()];
    assert!(settings.validate().is_err());

    settings.store.collections.clear();
    assert!(settings.validate().is_err());
}

#[test]
fn expand_path_handles_env_vars() {
    std::env::set_var("TERMBOOK_TEST_ROOT", "/var/lib/termbook");
    let p = expand_path("${TERMBOOK_TEST_ROOT}/records");
    assert_eq!(p, std::path::PathBuf::from("/var/lib/termbook/records"));
}
