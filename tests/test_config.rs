use session_sieve::config::load_config_from_path;
use session_sieve::{ConfigError, DEFAULT_FORMAT, SieveConfig, load_config};
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_no_file_means_defaults() {
    let config = load_config(None).expect("defaults");
    assert_eq!(config, SieveConfig::default());
    assert_eq!(config.output.format, DEFAULT_FORMAT);
    assert!(config.plugins.is_empty());
}

#[test]
fn test_full_file() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("sieve.toml");
    fs::write(
        &path,
        r#"
plugins = ["netcount|prefixlen=16"]

[pipeline]
threads = 6
high_water_mark = 4096
pop_batch = 32
idle_sleep_ms = 2

[output]
format = "${serial} ${sap} -> ${dap}"
buffered = false
json = true
"#,
    )
    .unwrap();

    let config = load_config_from_path(&path).expect("config should load");
    assert_eq!(config.plugins, ["netcount|prefixlen=16"]);
    assert_eq!(config.output.format, "${serial} ${sap} -> ${dap}");
    assert!(!config.output.buffered);
    assert!(config.output.json);

    let options = config.pipeline.to_options().expect("valid options");
    assert_eq!(options.threads, 6);
    assert_eq!(options.high_water_mark, 4096);
    assert_eq!(options.pop_batch, 32);
    assert_eq!(options.push_batch, 1024);
    assert_eq!(options.idle_sleep, Duration::from_millis(2));
}

#[test]
fn test_syntax_error_names_the_file() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[pipeline\nthreads = 2\n").unwrap();

    let err = load_config_from_path(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("broken.toml"));
}

#[test]
fn test_wrong_type_is_a_parse_error() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("typed.toml");
    fs::write(&path, "[pipeline]\nthreads = \"four\"\n").unwrap();

    assert!(matches!(
        load_config_from_path(&path),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn test_zero_batch_is_rejected() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("zero.toml");
    fs::write(&path, "[pipeline]\npush_batch = 0\n").unwrap();

    let config = load_config_from_path(&path).expect("parses fine");
    let err = config.pipeline.to_options().unwrap_err();
    assert!(err.to_string().contains("pipeline.push_batch"));
}
