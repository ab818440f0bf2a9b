use std::io::Write;

use protolens::settings::{AppConfig, LogFormat};

#[test]
fn test_defaults_without_config_file() {
    let cfg = AppConfig::load(None).unwrap();
    assert!(cfg.reflection.enabled);
    assert_eq!(cfg.reflection.timeout_ms, 10_000);
    assert!(!cfg.codec.strict_utf8);
    assert_eq!(cfg.codec.blind_decode_threshold, 0.8);
    assert_eq!(cfg.framing.gzip_max_output_bytes, 64 * 1024 * 1024);
    assert_eq!(cfg.log.format, LogFormat::Text);
}

#[test]
fn test_load_from_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[reflection]
enabled = false
timeout_ms = 250

[codec]
strict_utf8 = true
blind_decode_threshold = 0.5

[framing]
gzip_max_output_bytes = 1024

[log]
format = "json"
"#
    )
    .unwrap();

    let cfg = AppConfig::load(Some(file.path())).unwrap();
    assert!(!cfg.reflection.enabled);
    assert_eq!(cfg.reflection.timeout_ms, 250);
    assert!(cfg.codec.strict_utf8);
    assert_eq!(cfg.codec.blind_decode_threshold, 0.5);
    assert_eq!(cfg.framing.gzip_max_output_bytes, 1024);
    assert_eq!(cfg.log.format, LogFormat::Json);
}

#[test]
fn test_partial_config_fills_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[reflection]\ntimeout_ms = 500").unwrap();

    let cfg = AppConfig::load(Some(file.path())).unwrap();
    assert!(cfg.reflection.enabled);
    assert_eq!(cfg.reflection.timeout_ms, 500);
    assert_eq!(cfg.codec.blind_decode_threshold, 0.8);
}

#[test]
fn test_threshold_is_clamped_into_unit_interval() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[codec]\nblind_decode_threshold = 3.5").unwrap();
    let cfg = AppConfig::load(Some(file.path())).unwrap();
    assert_eq!(cfg.codec.to_options().blind_decode_threshold, 1.0);
}

#[test]
fn test_missing_file_is_an_error() {
    assert!(AppConfig::load(Some(std::path::Path::new("/nonexistent/protolens.toml"))).is_err());
}
