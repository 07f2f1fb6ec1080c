//! Configuration infrastructure
//!
//! Settings are layered with the `config` crate:
//! 1. Built-in defaults (see [`defaults`])
//! 2. Optional config file (TOML or JSON)
//! 3. `COMIC_SAGE_*` environment variables (`COMIC_SAGE_API__BASE_URL`, ...)
//! 4. The legacy `NEXT_PUBLIC_API_URL` variable for the API base URL,
//!    used only when the namespaced variable is not set
//!
//! An unusable base URL falls back to the default with a warning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};
use url::Url;

use crate::domain::phase::{Geometry, PhaseSchedule};

pub const ENV_PREFIX: &str = "COMIC_SAGE";
pub const LEGACY_BASE_URL_VAR: &str = "NEXT_PUBLIC_API_URL";
const BASE_URL_VAR: &str = "COMIC_SAGE_API__BASE_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub progress: ProgressConfig,
    pub animation: AnimationConfig,
    pub upload: UploadConfig,
    pub logging: LoggingConfig,
}

/// Valuation service endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,

    /// Fast endpoint tried first
    pub primary_path: String,

    /// Tried once when the primary fails
    pub fallback_path: String,

    /// Per attempt
    pub request_timeout_seconds: u64,

    pub user_agent: String,
}

/// Heuristic progress while a request is outstanding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub step: f64,
    pub interval_ms: u64,

    /// Must stay below 100 so only a real response completes progress
    pub cap: f64,
}

/// Phase table timings and geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    pub impact_threshold: f64,
    pub impact_flash_ms: u64,
    pub final_impact_delay_ms: u64,
    pub final_impact_ms: u64,
    pub final_clash_ms: u64,
    pub narrow_viewport_px: u32,
    pub distance_factor: f64,
    pub narrow_cap: f64,
    pub wide_cap: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_bytes: u64,
}

/// Logging configuration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// JSON lines in the log file instead of plain text
    pub json_format: bool,

    pub console_output: bool,
    pub file_output: bool,
    pub file_name: String,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,

    /// Module-specific log level filters (e.g., "reqwest": "info")
    pub module_filters: HashMap<String, String>,
}

/// Default configuration values
pub mod defaults {
    pub const BASE_URL: &str = "http://127.0.0.1:8000";
    pub const PRIMARY_PATH: &str = "/process_image_fast";
    pub const FALLBACK_PATH: &str = "/process_image";
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 60;
    pub const USER_AGENT: &str = concat!("comic-sage/", env!("CARGO_PKG_VERSION"));

    pub const PROGRESS_STEP: f64 = 10.0;
    pub const PROGRESS_INTERVAL_MS: u64 = 500;
    pub const PROGRESS_CAP: f64 = 90.0;

    pub const IMPACT_THRESHOLD: f64 = 98.0;
    pub const IMPACT_FLASH_MS: u64 = 300;
    pub const FINAL_IMPACT_DELAY_MS: u64 = 100;
    pub const FINAL_IMPACT_MS: u64 = 1500;
    pub const FINAL_CLASH_MS: u64 = 2000;
    pub const NARROW_VIEWPORT_PX: u32 = 640;
    pub const DISTANCE_FACTOR: f64 = 0.4;
    pub const NARROW_CAP: f64 = 25.0;
    pub const WIDE_CAP: f64 = 40.0;

    pub const MAX_FILE_BYTES: u64 = 20 * 1024 * 1024;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_JSON_FORMAT: bool = false;
    pub const LOG_CONSOLE_OUTPUT: bool = true;
    pub const LOG_FILE_OUTPUT: bool = false;
    pub const LOG_FILE_NAME: &str = "comic-sage.log";
    pub const LOG_MAX_FILES: u32 = 5;
    pub const LOG_AUTO_CLEANUP: bool = true;
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.to_string(),
            primary_path: defaults::PRIMARY_PATH.to_string(),
            fallback_path: defaults::FALLBACK_PATH.to_string(),
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            user_agent: defaults::USER_AGENT.to_string(),
        }
    }
}

impl ApiConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            step: defaults::PROGRESS_STEP,
            interval_ms: defaults::PROGRESS_INTERVAL_MS,
            cap: defaults::PROGRESS_CAP,
        }
    }
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            impact_threshold: defaults::IMPACT_THRESHOLD,
            impact_flash_ms: defaults::IMPACT_FLASH_MS,
            final_impact_delay_ms: defaults::FINAL_IMPACT_DELAY_MS,
            final_impact_ms: defaults::FINAL_IMPACT_MS,
            final_clash_ms: defaults::FINAL_CLASH_MS,
            narrow_viewport_px: defaults::NARROW_VIEWPORT_PX,
            distance_factor: defaults::DISTANCE_FACTOR,
            narrow_cap: defaults::NARROW_CAP,
            wide_cap: defaults::WIDE_CAP,
        }
    }
}

impl From<&AnimationConfig> for PhaseSchedule {
    fn from(config: &AnimationConfig) -> Self {
        Self::standard(
            config.impact_threshold,
            Duration::from_millis(config.impact_flash_ms),
            Duration::from_millis(config.final_impact_delay_ms),
            Duration::from_millis(config.final_impact_ms),
            Duration::from_millis(config.final_clash_ms),
            Geometry {
                distance_factor: config.distance_factor,
                narrow_cap: config.narrow_cap,
                wide_cap: config.wide_cap,
                narrow_below_px: config.narrow_viewport_px,
            },
        )
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: defaults::MAX_FILE_BYTES,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: defaults::LOG_AUTO_CLEANUP,
            module_filters: HashMap::from([
                ("reqwest".to_string(), "info".to_string()),
                ("hyper".to_string(), "warn".to_string()),
                ("tokio".to_string(), "info".to_string()),
            ]),
        }
    }
}

impl AppConfig {
    /// Layer defaults, an optional file and the given environment.
    ///
    /// `env` is passed in rather than read so callers (and tests) control
    /// exactly which variables apply.
    pub fn load_layered(
        file: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(env.clone())),
        );

        if !env.contains_key(BASE_URL_VAR) {
            builder = builder.set_override_option(
                "api.base_url",
                env.get(LEGACY_BASE_URL_VAR).filter(|url| !url.trim().is_empty()).cloned(),
            )?;
        }

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.api.base_url = sanitize_base_url(&config.api.base_url);
        config.validate()?;
        Ok(config)
    }

    /// Layer defaults, an optional file and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::load_layered(file, &env)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: &str| {
            Err(ConfigError::Validation {
                message: message.to_string(),
            })
        };

        if Url::parse(&self.api.base_url).is_err() {
            return fail("api.base_url is not a valid URL");
        }
        if self.api.primary_path == self.api.fallback_path {
            return fail("api.primary_path and api.fallback_path must differ");
        }
        if self.api.request_timeout_seconds == 0 {
            return fail("api.request_timeout_seconds must be greater than 0");
        }
        if self.progress.step.is_nan() || self.progress.step <= 0.0 {
            return fail("progress.step must be greater than 0");
        }
        if self.progress.interval_ms == 0 {
            return fail("progress.interval_ms must be greater than 0");
        }
        if self.progress.cap.is_nan() || self.progress.cap <= 0.0 || self.progress.cap >= 100.0 {
            return fail("progress.cap must be between 0 and 100 (exclusive)");
        }
        if self.animation.final_impact_delay_ms >= self.animation.final_impact_ms {
            return fail(
                "animation.final_impact_delay_ms must be shorter than animation.final_impact_ms",
            );
        }
        if self.upload.max_file_bytes == 0 {
            return fail("upload.max_file_bytes must be greater than 0");
        }

        Ok(())
    }
}

/// Keep `candidate` if it parses as an http(s) URL, otherwise the default.
fn sanitize_base_url(candidate: &str) -> String {
    let trimmed = candidate.trim();
    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => trimmed.to_string(),
        Ok(url) => {
            warn!(
                base_url = trimmed,
                scheme = url.scheme(),
                "Unsupported API URL scheme, using default"
            );
            defaults::BASE_URL.to_string()
        }
        Err(e) => {
            warn!(base_url = trimmed, error = %e, "Invalid API URL, using default");
            defaults::BASE_URL.to_string()
        }
    }
}

/// Locates, loads and persists the user's config file.
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    pub const FILE_STEM: &'static str = "comic_sage";

    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join("comic-sage");

        Ok(config_dir)
    }

    pub fn new() -> Result<Self> {
        Ok(Self::with_dir(Self::get_config_dir()?))
    }

    #[must_use]
    pub const fn with_dir(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    /// Where `save_config` writes.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(format!("{}.json", Self::FILE_STEM))
    }

    /// First existing `comic_sage.toml` or `comic_sage.json`.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        ["toml", "json"]
            .iter()
            .map(|ext| self.config_dir.join(format!("{}.{ext}", Self::FILE_STEM)))
            .find(|path| path.is_file())
    }

    /// Layered load using whichever config file exists.
    pub fn load(&self, env: &HashMap<String, String>) -> Result<AppConfig> {
        let file = self.find_config_file();
        match &file {
            Some(path) => info!("Loading configuration from: {:?}", path),
            None => info!("No configuration file in {:?}, using defaults", self.config_dir),
        }
        AppConfig::load_layered(file.as_deref(), env).context("Failed to load configuration")
    }

    /// Write defaults on the very first run, then load.
    pub async fn initialize_on_first_run(
        &self,
        env: &HashMap<String, String>,
    ) -> Result<AppConfig> {
        if self.find_config_file().is_none() {
            info!("First run detected - writing default configuration");
            self.save_config(&AppConfig::default()).await?;
        }
        self.load(env)
    }

    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir)
            .await
            .context("Failed to create config directory")?;

        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;

        let path = self.config_path();
        fs::write(&path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.base_url, "http://127.0.0.1:8000");
        assert_eq!(config.api.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.upload.max_file_bytes, 20 * 1024 * 1024);
    }

    #[test]
    fn test_empty_environment_yields_defaults() {
        let config = AppConfig::load_layered(None, &HashMap::new()).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_prefixed_environment_overrides() {
        let config = AppConfig::load_layered(
            None,
            &env(&[
                ("COMIC_SAGE_API__BASE_URL", "https://api.comicsage.example"),
                ("COMIC_SAGE_API__REQUEST_TIMEOUT_SECONDS", "15"),
                ("COMIC_SAGE_PROGRESS__STEP", "5"),
                ("UNRELATED", "x"),
            ]),
        )
        .unwrap();

        assert_eq!(config.api.base_url, "https://api.comicsage.example");
        assert_eq!(config.api.request_timeout_seconds, 15);
        assert_eq!(config.progress.step, 5.0);
    }

    #[test]
    fn test_legacy_variable_sets_base_url() {
        let config = AppConfig::load_layered(
            None,
            &env(&[("NEXT_PUBLIC_API_URL", "https://legacy.example:9000")]),
        )
        .unwrap();
        assert_eq!(config.api.base_url, "https://legacy.example:9000");

        // The namespaced variable wins
        let config = AppConfig::load_layered(
            None,
            &env(&[
                ("NEXT_PUBLIC_API_URL", "https://legacy.example:9000"),
                ("COMIC_SAGE_API__BASE_URL", "https://new.example"),
            ]),
        )
        .unwrap();
        assert_eq!(config.api.base_url, "https://new.example");
    }

    #[rstest]
    #[case("not a url")]
    #[case("ftp://files.example")]
    #[case("   ")]
    fn test_invalid_base_url_falls_back_to_default(#[case] value: &str) {
        let config =
            AppConfig::load_layered(None, &env(&[("COMIC_SAGE_API__BASE_URL", value)])).unwrap();
        assert_eq!(config.api.base_url, defaults::BASE_URL);
    }

    #[test]
    fn test_file_layer_is_applied_before_environment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("comic_sage.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[api]\nbase_url = \"https://file.example\"\nrequest_timeout_seconds = 30\n\n[upload]\nmax_file_bytes = 1024"
        )
        .unwrap();
        drop(file);

        let config = AppConfig::load_layered(
            Some(&path),
            &env(&[("COMIC_SAGE_API__REQUEST_TIMEOUT_SECONDS", "45")]),
        )
        .unwrap();

        assert_eq!(config.api.base_url, "https://file.example");
        assert_eq!(config.api.request_timeout_seconds, 45);
        assert_eq!(config.upload.max_file_bytes, 1024);
        assert_eq!(config.api.primary_path, defaults::PRIMARY_PATH);
    }

    #[rstest]
    #[case(("COMIC_SAGE_PROGRESS__CAP", "100"))]
    #[case(("COMIC_SAGE_PROGRESS__CAP", "0"))]
    #[case(("COMIC_SAGE_PROGRESS__INTERVAL_MS", "0"))]
    #[case(("COMIC_SAGE_API__REQUEST_TIMEOUT_SECONDS", "0"))]
    #[case(("COMIC_SAGE_API__FALLBACK_PATH", "/process_image_fast"))]
    #[case(("COMIC_SAGE_ANIMATION__FINAL_IMPACT_DELAY_MS", "1500"))]
    fn test_validation_rejects(#[case] pair: (&str, &str)) {
        let result = AppConfig::load_layered(None, &env(&[pair]));
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_animation_config_builds_schedule() {
        let schedule = PhaseSchedule::from(&AnimationConfig::default());
        assert_eq!(schedule, PhaseSchedule::default());
    }

    #[tokio::test]
    async fn test_config_manager_first_run_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_dir(dir.path().join("comic-sage"));
        assert!(manager.find_config_file().is_none());

        let config = manager.initialize_on_first_run(&HashMap::new()).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(manager.find_config_file(), Some(manager.config_path()));
    }

    #[tokio::test]
    async fn test_config_manager_round_trips_saved_changes() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_dir(dir.path().to_path_buf());

        let mut config = AppConfig::default();
        config.api.base_url = "https://saved.example".to_string();
        config.logging.level = "debug".to_string();
        manager.save_config(&config).await.unwrap();

        let loaded = manager.load(&HashMap::new()).unwrap();
        assert_eq!(loaded.api.base_url, "https://saved.example");
        assert_eq!(loaded.logging.level, "debug");
    }
}
