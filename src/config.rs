use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::camera::FacingMode;
use crate::inference::DEFAULT_ENDPOINT;
use crate::live::LiveSettings;

const DEFAULT_CAMERA_URL: &str = "stub://rear_camera";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RetinaConfigFile {
    classifier: Option<ClassifierConfigFile>,
    camera: Option<CameraConfigFile>,
    live: Option<LiveConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ClassifierConfigFile {
    endpoint: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    url: Option<String>,
    facing: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LiveConfigFile {
    tick_ms: Option<u64>,
    jpeg_quality: Option<u8>,
    result_policy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RetinaConfig {
    pub classifier: ClassifierSettings,
    pub camera: CameraSettings,
    pub live: LiveSettings,
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub endpoint: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub url: String,
    pub facing: FacingMode,
}

impl Default for RetinaConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierSettings {
                endpoint: DEFAULT_ENDPOINT.to_string(),
                timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            },
            camera: CameraSettings {
                url: DEFAULT_CAMERA_URL.to_string(),
                facing: FacingMode::default(),
            },
            live: LiveSettings::default(),
        }
    }
}

impl RetinaConfig {
    /// Defaults, then the file named by `RETINA_CONFIG`, then `RETINA_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RETINA_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RetinaConfigFile) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(classifier) = file.classifier {
            if let Some(endpoint) = classifier.endpoint {
                cfg.classifier.endpoint = endpoint;
            }
            if let Some(secs) = classifier.timeout_secs {
                cfg.classifier.timeout = Duration::from_secs(secs);
            }
        }
        if let Some(camera) = file.camera {
            if let Some(url) = camera.url {
                cfg.camera.url = url;
            }
            if let Some(facing) = camera.facing {
                cfg.camera.facing = facing.parse()?;
            }
        }
        if let Some(live) = file.live {
            if let Some(ms) = live.tick_ms {
                cfg.live.tick_interval = Duration::from_millis(ms);
            }
            if let Some(quality) = live.jpeg_quality {
                cfg.live.jpeg_quality = quality;
            }
            if let Some(policy) = live.result_policy {
                cfg.live.result_policy = policy.parse()?;
            }
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(endpoint) = non_empty_env("RETINA_ENDPOINT") {
            self.classifier.endpoint = endpoint;
        }
        if let Some(url) = non_empty_env("RETINA_CAMERA_URL") {
            self.camera.url = url;
        }
        if let Some(facing) = non_empty_env("RETINA_CAMERA_FACING") {
            self.camera.facing = facing.parse()?;
        }
        if let Some(ms) = non_empty_env("RETINA_TICK_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .map_err(|_| anyhow!("RETINA_TICK_MS must be an integer number of milliseconds"))?;
            self.live.tick_interval = Duration::from_millis(ms);
        }
        if let Some(quality) = non_empty_env("RETINA_JPEG_QUALITY") {
            self.live.jpeg_quality = quality
                .trim()
                .parse()
                .map_err(|_| anyhow!("RETINA_JPEG_QUALITY must be an integer from 1 to 100"))?;
        }
        if let Some(secs) = non_empty_env("RETINA_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| anyhow!("RETINA_TIMEOUT_SECS must be an integer number of seconds"))?;
            self.classifier.timeout = Duration::from_secs(secs);
        }
        if let Some(policy) = non_empty_env("RETINA_RESULT_POLICY") {
            self.live.result_policy = policy.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        validate_endpoint(&self.classifier.endpoint)?;
        if self.classifier.timeout.is_zero() {
            return Err(anyhow!("classifier timeout must be greater than zero"));
        }
        if self.live.tick_interval.is_zero() {
            return Err(anyhow!("tick interval must be greater than zero"));
        }
        if !(1..=100).contains(&self.live.jpeg_quality) {
            return Err(anyhow!(
                "jpeg quality must be between 1 and 100, got {}",
                self.live.jpeg_quality
            ));
        }
        if self.camera.url.trim().is_empty() {
            return Err(anyhow!("camera url must not be empty"));
        }
        Ok(())
    }
}

/// Accept only absolute http(s) URLs with a host.
pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    let parsed = url::Url::parse(endpoint)
        .with_context(|| format!("invalid classifier endpoint '{}'", endpoint))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(anyhow!(
                "classifier endpoint must use http or https, got '{}'",
                other
            ))
        }
    }
    if parsed.host_str().is_none() {
        return Err(anyhow!("classifier endpoint '{}' has no host", endpoint));
    }
    Ok(())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<RetinaConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::ResultPolicy;

    #[test]
    fn defaults_are_valid() {
        let cfg = RetinaConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.live.tick_interval, Duration::from_millis(1500));
        assert_eq!(cfg.live.jpeg_quality, 80);
        assert_eq!(cfg.live.result_policy, ResultPolicy::EpochGated);
        assert_eq!(cfg.camera.facing, FacingMode::Environment);
    }

    #[test]
    fn endpoint_must_be_http() {
        assert!(validate_endpoint("https://example.org/predict").is_ok());
        assert!(validate_endpoint("ftp://example.org/predict").is_err());
        assert!(validate_endpoint("not a url").is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut cfg = RetinaConfig::default();
        cfg.live.tick_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn quality_out_of_range_is_rejected() {
        let mut cfg = RetinaConfig::default();
        cfg.live.jpeg_quality = 0;
        assert!(cfg.validate().is_err());
        cfg.live.jpeg_quality = 100;
        assert!(cfg.validate().is_ok());
    }
}
