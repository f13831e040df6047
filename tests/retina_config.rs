use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use retina_live::config::RetinaConfig;
use retina_live::{FacingMode, ResultPolicy, DEFAULT_ENDPOINT};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "RETINA_CONFIG",
        "RETINA_ENDPOINT",
        "RETINA_CAMERA_URL",
        "RETINA_CAMERA_FACING",
        "RETINA_TICK_MS",
        "RETINA_JPEG_QUALITY",
        "RETINA_TIMEOUT_SECS",
        "RETINA_RESULT_POLICY",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = RetinaConfig::load().expect("load config");
    assert_eq!(cfg.classifier.endpoint, DEFAULT_ENDPOINT);
    assert_eq!(cfg.live.tick_interval, Duration::from_millis(1500));
    assert_eq!(cfg.live.jpeg_quality, 80);
    assert_eq!(cfg.live.result_policy, ResultPolicy::EpochGated);
    assert_eq!(cfg.camera.facing, FacingMode::Environment);
}

#[test]
fn loads_toml_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(
        ".toml",
        r#"
[classifier]
endpoint = "http://10.0.0.5:8000/predict"
timeout_secs = 12

[camera]
url = "http://10.0.0.9/stream"
facing = "user"

[live]
tick_ms = 2000
jpeg_quality = 70
result_policy = "legacy"
"#,
    );
    std::env::set_var("RETINA_CONFIG", file.path());
    std::env::set_var("RETINA_TICK_MS", "1000");
    std::env::set_var("RETINA_CAMERA_FACING", "rear");

    let cfg = RetinaConfig::load().expect("load config");
    assert_eq!(cfg.classifier.endpoint, "http://10.0.0.5:8000/predict");
    assert_eq!(cfg.classifier.timeout, Duration::from_secs(12));
    assert_eq!(cfg.camera.url, "http://10.0.0.9/stream");
    assert_eq!(cfg.camera.facing, FacingMode::Environment);
    assert_eq!(cfg.live.tick_interval, Duration::from_millis(1000));
    assert_eq!(cfg.live.jpeg_quality, 70);
    assert_eq!(cfg.live.result_policy, ResultPolicy::Legacy);

    clear_env();
}

#[test]
fn loads_json_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(
        ".json",
        r#"{
            "camera": { "url": "stub://bench" },
            "live": { "result_policy": "epoch-gated", "jpeg_quality": 90 }
        }"#,
    );
    std::env::set_var("RETINA_CONFIG", file.path());
    std::env::set_var("RETINA_ENDPOINT", "https://screening.example.org/predict");

    let cfg = RetinaConfig::load().expect("load config");
    assert_eq!(cfg.camera.url, "stub://bench");
    assert_eq!(cfg.live.jpeg_quality, 90);
    assert_eq!(cfg.classifier.endpoint, "https://screening.example.org/predict");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    for (key, value) in [
        ("RETINA_TICK_MS", "0"),
        ("RETINA_TICK_MS", "fast"),
        ("RETINA_JPEG_QUALITY", "0"),
        ("RETINA_JPEG_QUALITY", "101"),
        ("RETINA_ENDPOINT", "ftp://example.org/predict"),
        ("RETINA_RESULT_POLICY", "sometimes"),
        ("RETINA_CAMERA_FACING", "sideways"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(
            RetinaConfig::load().is_err(),
            "{}={} should be rejected",
            key,
            value
        );
    }
    clear_env();
}

#[test]
fn unknown_keys_in_file_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(".toml", "[live]\ntick = 5\n");
    std::env::set_var("RETINA_CONFIG", file.path());
    assert!(RetinaConfig::load().is_err());

    clear_env();
}
