//! Service settings
//!
//! Static configuration: where the model lives, how the server listens, and
//! the fixed generation parameters. Loaded from JSON, then overridden from
//! the environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::{GenerationParams, RuntimeParams};

/// Settings file location override
pub const CONFIG_ENV: &str = "EDGECHAT_CONFIG";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    ConfigDir,
    #[error("Failed to read settings file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Address to bind
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Path to the GGUF model file
    pub model_path: PathBuf,
    /// Human-readable model name reported by the health endpoint
    pub model_type: String,
    /// How long a chat request waits for the model before giving up
    pub deadline_secs: u64,
    /// Maximum inference workers alive at once, abandoned ones included
    pub max_in_flight: usize,
    /// Model loading parameters
    pub runtime: RuntimeParams,
    /// Sampling parameters applied to every request
    pub generation: GenerationParams,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            model_path: PathBuf::from("models/tinyllama-1.1b-chat-v1.0.Q4_0.gguf"),
            model_type: "TinyLlama-1.1B-Chat".to_string(),
            // Small boards can take minutes on long prompts
            deadline_secs: 300,
            max_in_flight: 2,
            runtime: RuntimeParams::default(),
            generation: GenerationParams::default(),
        }
    }
}

impl ServiceSettings {
    /// The inference deadline as a `Duration`
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Socket address string for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges
    pub fn validate(&mut self) {
        let defaults = Self::default();

        // clamp keeps NaN, so those go back to the defaults first
        if self.generation.temperature.is_nan() {
            self.generation.temperature = defaults.generation.temperature;
        }
        if self.generation.top_p.is_nan() {
            self.generation.top_p = defaults.generation.top_p;
        }
        self.generation.temperature = self.generation.temperature.clamp(0.0, 2.0);
        self.generation.top_p = self.generation.top_p.clamp(0.0, 1.0);
        if self.generation.repeat_penalty.is_nan() || self.generation.repeat_penalty <= 0.0 {
            self.generation.repeat_penalty = 1.0;
        }
        if self.generation.max_tokens == 0 {
            self.generation.max_tokens = defaults.generation.max_tokens;
        }

        if self.deadline_secs == 0 {
            self.deadline_secs = defaults.deadline_secs;
        }
        if self.max_in_flight == 0 {
            self.max_in_flight = defaults.max_in_flight;
        }

        if self.runtime.context_size == 0 {
            self.runtime.context_size = defaults.runtime.context_size;
        }
        if self.runtime.batch_size == 0 {
            self.runtime.batch_size = defaults.runtime.batch_size;
        }
        if self.runtime.threads <= 0 {
            self.runtime.threads = defaults.runtime.threads;
        }
    }

    /// Apply `PORT`, `HOST`, `MODEL_PATH` and `INFERENCE_DEADLINE_SECS`
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            match port.trim().parse() {
                Ok(port) => self.port = port,
                Err(e) => tracing::warn!("Ignoring invalid PORT {:?}: {}", port, e),
            }
        }
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(path) = lookup("MODEL_PATH") {
            self.model_path = PathBuf::from(path);
        }
        if let Some(secs) = lookup("INFERENCE_DEADLINE_SECS") {
            match secs.trim().parse() {
                Ok(secs) => self.deadline_secs = secs,
                Err(e) => tracing::warn!("Ignoring invalid INFERENCE_DEADLINE_SECS {:?}: {}", secs, e),
            }
        }
    }
}

/// Default settings file path in the platform config directory
fn default_settings_path() -> Result<PathBuf, ConfigError> {
    directories::ProjectDirs::from("com", "EdgeChat", "EdgeChat")
        .map(|dirs| dirs.config_dir().join("settings.json"))
        .ok_or(ConfigError::ConfigDir)
}

/// Load settings
///
/// Uses `path` if given, else `$EDGECHAT_CONFIG`, else the platform config
/// directory. Returns defaults if the file doesn't exist or is corrupted.
/// Environment overrides are applied last.
pub fn load_settings(path: Option<&Path>) -> ServiceSettings {
    let path = match path {
        Some(p) => Ok(p.to_path_buf()),
        None => match std::env::var(CONFIG_ENV) {
            Ok(p) => Ok(PathBuf::from(p)),
            Err(_) => default_settings_path(),
        },
    };

    let mut settings = match path.and_then(|p| read_settings(&p)) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            ServiceSettings::default()
        }
    };

    settings.apply_env();
    settings.validate();
    settings
}

/// Internal settings loading with error propagation
fn read_settings(path: &Path) -> Result<ServiceSettings, ConfigError> {
    if !path.exists() {
        tracing::info!("Settings file {} not found, using defaults", path.display());
        return Ok(ServiceSettings::default());
    }

    let json = fs::read_to_string(path)?;
    let settings: ServiceSettings = serde_json::from_str(&json)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_settings() {
        let settings = ServiceSettings::default();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.deadline(), Duration::from_secs(300));
        assert_eq!(settings.generation.max_tokens, 128);
        assert_eq!(settings.runtime.context_size, 512);
        assert_eq!(settings.runtime.batch_size, 8);
        assert_eq!(settings.runtime.threads, 2);
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = ServiceSettings::default();

        settings.generation.temperature = 5.0;
        settings.generation.top_p = -0.5;
        settings.generation.repeat_penalty = 0.0;
        settings.deadline_secs = 0;
        settings.max_in_flight = 0;
        settings.runtime.batch_size = 0;
        settings.validate();

        assert_eq!(settings.generation.temperature, 2.0);
        assert_eq!(settings.generation.top_p, 0.0);
        assert_eq!(settings.generation.repeat_penalty, 1.0);
        assert_eq!(settings.deadline_secs, 300);
        assert_eq!(settings.max_in_flight, 2);
        assert_eq!(settings.runtime.batch_size, 8);
    }

    #[test]
    fn test_nan_sampling_values_fall_back_to_defaults() {
        let defaults = ServiceSettings::default();
        let mut settings = ServiceSettings::default();

        settings.generation.temperature = f32::NAN;
        settings.generation.top_p = f32::NAN;
        settings.generation.repeat_penalty = f32::NAN;
        settings.validate();

        assert_eq!(settings.generation.temperature, defaults.generation.temperature);
        assert_eq!(settings.generation.top_p, defaults.generation.top_p);
        assert_eq!(settings.generation.repeat_penalty, 1.0);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "9000"),
            ("MODEL_PATH", "/opt/model.gguf"),
            ("INFERENCE_DEADLINE_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut settings = ServiceSettings::default();
        settings.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.port, 9000);
        assert_eq!(settings.model_path, PathBuf::from("/opt/model.gguf"));
        // invalid value is ignored
        assert_eq!(settings.deadline_secs, 300);
        assert_eq!(settings.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"deadline_secs": 30, "generation": {"max_tokens": 64}}"#).unwrap();

        let settings = read_settings(&path).unwrap();
        assert_eq!(settings.deadline_secs, 30);
        assert_eq!(settings.generation.max_tokens, 64);
        assert!((settings.generation.top_p - 0.95).abs() < 0.001);
        assert_eq!(settings.model_type, "TinyLlama-1.1B-Chat");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(read_settings(&path), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_settings(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.port, ServiceSettings::default().port);
    }
}
