//! Locale Loading Tests
//!
//! Tables read from a locales directory:
//! - Base < language overlay < config override
//! - Missing and broken overlays
//! - Missing base tables

use std::fs;
use std::path::Path;

use stationha_core::{ExtensionConfig, LocaleOptions, MetadataTables, TableError};

fn write_base(dir: &Path) {
    fs::write(
        dir.join("enums.toml"),
        "[levels]\n0 = \"low\"\n1 = \"high\"\n",
    )
    .unwrap();
    fs::write(
        dir.join("units.toml"),
        "[degree_C]\nunit_of_measurement = \"°C\"\n",
    )
    .unwrap();
    fs::write(
        dir.join("sensors.toml"),
        r#"
[outTemp]
metadata = { name = "Outdoor Temperature", icon = "mdi:thermometer" }

[level]
metadata = { name = "Level", device_class = "enum", options = "@levels" }
"#,
    )
    .unwrap();
}

#[test]
fn test_overlay_order() {
    let dir = tempfile::tempdir().unwrap();
    write_base(dir.path());
    fs::write(
        dir.path().join("sensors_fr.toml"),
        "[outTemp.metadata]\nname = \"Température extérieure\"\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("enums_fr.toml"),
        "[levels]\n0 = \"bas\"\n1 = \"haut\"\n",
    )
    .unwrap();

    let tables =
        MetadataTables::load(&LocaleOptions::default().with_locales_dir(dir.path()).with_lang("fr"))
            .unwrap();

    let out = tables.sensor("outTemp").unwrap();
    assert_eq!(out.name(), Some("Température extérieure"));
    assert_eq!(out.metadata["icon"], "mdi:thermometer");

    let level = tables.sensor("level").unwrap();
    assert_eq!(level.metadata["options"], serde_json::json!(["bas", "haut"]));
}

#[test]
fn test_config_override_beats_locale() {
    let dir = tempfile::tempdir().unwrap();
    write_base(dir.path());
    fs::write(
        dir.path().join("sensors_fr.toml"),
        "[outTemp.metadata]\nname = \"Température extérieure\"\n",
    )
    .unwrap();

    let config = ExtensionConfig::from_toml_str(&format!(
        r#"
node_id = "garden"
lang = "fr"
locales_dir = "{}"

[mqtt]
hostname = "localhost"

[station]
name = "Garden"
model = "WS"
manufacturer = "Acme"

[sensors.outTemp.metadata]
name = "Garden Temperature"
"#,
        dir.path().display().to_string().replace('\\', "/")
    ))
    .unwrap();

    let tables = MetadataTables::load(&config.locale_options()).unwrap();
    assert_eq!(tables.sensor("outTemp").unwrap().name(), Some("Garden Temperature"));
}

#[test]
fn test_broken_overlay_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    write_base(dir.path());
    fs::write(dir.path().join("sensors_xx.toml"), "[outTemp\nname = ").unwrap();

    let tables =
        MetadataTables::load(&LocaleOptions::default().with_locales_dir(dir.path()).with_lang("xx"))
            .unwrap();
    assert_eq!(tables.sensor("outTemp").unwrap().name(), Some("Outdoor Temperature"));
}

#[test]
fn test_missing_base_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write_base(dir.path());
    fs::remove_file(dir.path().join("units.toml")).unwrap();

    let result = MetadataTables::load(&LocaleOptions::default().with_locales_dir(dir.path()));
    assert!(matches!(result, Err(TableError::MissingBase(ref name)) if name == "units.toml"));
}

#[test]
fn test_broken_base_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write_base(dir.path());
    fs::write(dir.path().join("sensors.toml"), "not toml at all = = =").unwrap();

    let result = MetadataTables::load(&LocaleOptions::default().with_locales_dir(dir.path()));
    assert!(matches!(result, Err(TableError::Parse { .. })));
}
