use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RasterPoolError;
use crate::resource::{ResourceFormat, ResourceTarget};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T>(profile: &str, key: &str) -> Result<Option<T>, RasterPoolError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match profiled_env_opt(profile, key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| RasterPoolError::Config(format!("{key}={raw}: {e}"))),
        None => Ok(None),
    }
}

const PROFILE_KEY: &str = "RASTERPOOL_PROFILE";
const MAX_TRANSFER_BUFFER_KEY: &str = "RASTERPOOL_MAX_TRANSFER_BUFFER_BYTES";
const RESOURCE_TARGET_KEY: &str = "RASTERPOOL_RESOURCE_TARGET";
const RESOURCE_FORMAT_KEY: &str = "RASTERPOOL_RESOURCE_FORMAT";
const CHECK_DELAY_KEY: &str = "RASTERPOOL_CHECK_DELAY_MS";

// ── Pool config ───────────────────────────────────────────────

/// Configuration of a raster worker pool.
///
/// Parsed from TOML or built from environment variables. When a profile is
/// active (e.g. `PROD`), every key is first looked up as `{PROFILE}_{KEY}`,
/// falling back to `{KEY}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,

    /// Maximum bytes allowed in flight between raster output and GPU memory.
    #[serde(default = "default_max_transfer_buffer")]
    pub max_transfer_buffer_usage_bytes: usize,

    /// Texture target passed through to the resource provider.
    #[serde(default)]
    pub resource_target: ResourceTarget,

    /// Texture format passed through to the resource provider.
    #[serde(default)]
    pub resource_format: ResourceFormat,

    /// Delay between completion checks while work is outstanding.
    #[serde(default = "default_check_delay_ms")]
    pub check_for_completed_tasks_delay_ms: u64,
}

fn default_max_transfer_buffer() -> usize {
    16 * 1024 * 1024
}

fn default_check_delay_ms() -> u64 {
    6
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            max_transfer_buffer_usage_bytes: default_max_transfer_buffer(),
            resource_target: ResourceTarget::default(),
            resource_format: ResourceFormat::default(),
            check_for_completed_tasks_delay_ms: default_check_delay_ms(),
        }
    }
}

impl PoolConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `RASTERPOOL_PROFILE`.
    pub fn from_env() -> Result<Self, RasterPoolError> {
        let profile = env_opt(PROFILE_KEY).unwrap_or_default();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Result<Self, RasterPoolError> {
        let mut config = Self {
            profile: profile.to_uppercase(),
            ..Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RasterPoolError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.profile = config.profile.to_uppercase();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RasterPoolError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Apply environment variable overrides for the active profile.
    ///
    /// - `RASTERPOOL_MAX_TRANSFER_BUFFER_BYTES` -> `max_transfer_buffer_usage_bytes`
    /// - `RASTERPOOL_RESOURCE_TARGET` -> `resource_target`
    /// - `RASTERPOOL_RESOURCE_FORMAT` -> `resource_format`
    /// - `RASTERPOOL_CHECK_DELAY_MS` -> `check_for_completed_tasks_delay_ms`
    pub(crate) fn apply_env_overrides(&mut self) -> Result<(), RasterPoolError> {
        let p = self.profile.clone();
        if let Some(v) = profiled_env_parse(&p, MAX_TRANSFER_BUFFER_KEY)? {
            self.max_transfer_buffer_usage_bytes = v;
        }
        if let Some(v) = profiled_env_parse(&p, RESOURCE_TARGET_KEY)? {
            self.resource_target = v;
        }
        if let Some(v) = profiled_env_parse(&p, RESOURCE_FORMAT_KEY)? {
            self.resource_format = v;
        }
        if let Some(v) = profiled_env_parse(&p, CHECK_DELAY_KEY)? {
            self.check_for_completed_tasks_delay_ms = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), RasterPoolError> {
        if self.max_transfer_buffer_usage_bytes == 0 {
            return Err(RasterPoolError::Config(
                "max_transfer_buffer_usage_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn check_delay(&self) -> Duration {
        Duration::from_millis(self.check_for_completed_tasks_delay_ms)
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Raster pool config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  upload budget:  {} bytes",
            self.max_transfer_buffer_usage_bytes
        );
        tracing::info!(
            "  resources:      target={}, format={}",
            self.resource_target,
            self.resource_format
        );
        tracing::info!(
            "  check delay:    {}ms",
            self.check_for_completed_tasks_delay_ms
        );
    }

    /// JSON view of the config for state dumps.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "max_transfer_buffer_usage_bytes": self.max_transfer_buffer_usage_bytes,
            "resource_target": self.resource_target.to_string(),
            "resource_format": self.resource_format.to_string(),
            "check_for_completed_tasks_delay_ms": self.check_for_completed_tasks_delay_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_transfer_buffer_usage_bytes, 16 * 1024 * 1024);
        assert_eq!(config.resource_target, ResourceTarget::Texture2D);
        assert_eq!(config.resource_format, ResourceFormat::Rgba8888);
        assert_eq!(config.check_delay(), Duration::from_millis(6));
        assert_eq!(config.profile_label(), "default");
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
profile = "bench"
max_transfer_buffer_usage_bytes = 1048576
resource_target = "texture_external"
resource_format = "rgba4444"
check_for_completed_tasks_delay_ms = 12
"#;
        let config = PoolConfig::from_toml(toml).unwrap();
        assert_eq!(config.profile, "BENCH");
        assert_eq!(config.max_transfer_buffer_usage_bytes, 1_048_576);
        assert_eq!(config.resource_target, ResourceTarget::TextureExternal);
        assert_eq!(config.resource_format, ResourceFormat::Rgba4444);
        assert_eq!(config.check_delay(), Duration::from_millis(12));
    }

    #[test]
    fn parse_minimal_toml_uses_defaults() {
        let config = PoolConfig::from_toml("").unwrap();
        assert_eq!(config.max_transfer_buffer_usage_bytes, default_max_transfer_buffer());
        assert_eq!(config.check_for_completed_tasks_delay_ms, 6);
    }

    #[test]
    fn zero_budget_rejected() {
        let err = PoolConfig::from_toml("max_transfer_buffer_usage_bytes = 0").unwrap_err();
        assert!(matches!(err, RasterPoolError::Config(_)));
    }

    #[test]
    fn unknown_format_rejected() {
        let err = PoolConfig::from_toml(r#"resource_format = "yuv""#).unwrap_err();
        assert!(matches!(err, RasterPoolError::ConfigParse(_)));
    }

    #[test]
    fn profiled_env_lookup_prefers_prefixed_key() {
        // Keys unique to this test so parallel tests don't observe them.
        env::set_var("CFGTEST_PROFILED_KEY", "base");
        env::set_var("STAGING_CFGTEST_PROFILED_KEY", "staging");
        assert_eq!(
            profiled_env_opt("STAGING", "CFGTEST_PROFILED_KEY").as_deref(),
            Some("staging")
        );
        assert_eq!(
            profiled_env_opt("OTHER", "CFGTEST_PROFILED_KEY").as_deref(),
            Some("base")
        );
        assert_eq!(profiled_env_opt("", "CFGTEST_PROFILED_KEY").as_deref(), Some("base"));
        env::remove_var("CFGTEST_PROFILED_KEY");
        env::remove_var("STAGING_CFGTEST_PROFILED_KEY");
    }

    #[test]
    fn profiled_env_parse_reports_bad_values() {
        env::set_var("CFGTEST_BAD_NUMBER", "lots");
        let err = profiled_env_parse::<usize>("", "CFGTEST_BAD_NUMBER").unwrap_err();
        assert!(err.to_string().contains("CFGTEST_BAD_NUMBER"));
        env::remove_var("CFGTEST_BAD_NUMBER");
    }

    #[test]
    fn summary_contains_budget() {
        let summary = PoolConfig::default().summary();
        assert_eq!(summary["max_transfer_buffer_usage_bytes"], 16 * 1024 * 1024);
        assert_eq!(summary["resource_format"], "rgba8888");
    }
}
