//! Configuration
//!
//! Resolved once at startup, in order of increasing precedence:
//! 1. built-in defaults
//! 2. a TOML file (`--config` or `REPLCOG_CONFIG_PATH`)
//! 3. `REPLCOG_*` environment variables, `.env` included
//!
//! Nested keys use a double underscore: `REPLCOG_PAGER__PAGE_SIZE=1500`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use tracing::debug;

use crate::display::RetryPolicy;
use crate::execution::ExecutionOptions;
use crate::shell::ShellOptions;

pub const ENV_PREFIX: &str = "REPLCOG";
pub const CONFIG_PATH_ENV: &str = "REPLCOG_CONFIG_PATH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/* ===================== Flags ===================== */

/// Parse a boolean flag the way environment variables are usually written
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Int(i64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Bool(value) => Ok(value),
        Raw::Int(0) => Ok(false),
        Raw::Int(1) => Ok(true),
        Raw::Int(other) => Err(de::Error::custom(format!("invalid flag value {}", other))),
        Raw::Str(text) => parse_flag(&text)
            .ok_or_else(|| de::Error::custom(format!("invalid flag value {:?}", text))),
    }
}

/* ===================== Sections ===================== */

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PagerConfig {
    /// Largest rendered page, fence included
    pub page_size: usize,
    pub max_message_len: usize,
    pub max_file_preview: usize,
    pub throttle_ms: u64,
    pub idle_timeout_secs: u64,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            page_size: 1980,
            max_message_len: 2000,
            max_file_preview: 50_000,
            throttle_ms: 1000,
            idle_timeout_secs: 7200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub step_budget: usize,
    pub traceback_limit: usize,
    /// Most runs of one timed snippet
    pub timeit_max_iterations: usize,
    /// No new timed run starts after this long
    pub timeit_max_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        let options = ExecutionOptions::default();
        Self {
            step_budget: options.step_budget,
            traceback_limit: options.traceback_limit,
            timeit_max_iterations: 10_000,
            timeit_max_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Give up on a command silent for this long
    pub timeout_secs: u64,
    /// Cancel a shell view nobody fed for this long
    pub idle_timeout_secs: u64,
    pub queue_capacity: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            idle_timeout_secs: 120,
            queue_capacity: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

/* ===================== Config ===================== */

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Keep the scope between evaluations
    #[serde(deserialize_with = "flag")]
    pub retain: bool,
    /// Bind `author` instead of `_author`
    #[serde(deserialize_with = "flag")]
    pub no_underscore: bool,
    /// Overrides the prefix implied by `no_underscore`
    pub scope_prefix: Option<String>,
    /// Always page long results instead of attaching a file
    #[serde(deserialize_with = "flag")]
    pub force_paginator: bool,
    /// Never send tracebacks privately
    #[serde(deserialize_with = "flag")]
    pub no_dm_traceback: bool,
    /// Always send tracebacks privately
    #[serde(deserialize_with = "flag")]
    pub always_dm_traceback: bool,
    #[serde(deserialize_with = "flag")]
    pub use_ansi_always: bool,
    #[serde(deserialize_with = "flag")]
    pub use_ansi_never: bool,
    pub pager: PagerConfig,
    pub execution: ExecutionConfig,
    pub shell: ShellConfig,
    pub delivery: DeliveryConfig,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the process environment and the configured file
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    /// Prefix of the convenience bindings
    pub fn scope_prefix(&self) -> &str {
        match &self.scope_prefix {
            Some(prefix) => prefix,
            None if self.no_underscore => "",
            None => "_",
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pager.page_size > self.pager.max_message_len {
            return Err(ConfigError::Invalid(format!(
                "pager.page_size ({}) exceeds pager.max_message_len ({})",
                self.pager.page_size, self.pager.max_message_len
            )));
        }
        if self.always_dm_traceback && self.no_dm_traceback {
            return Err(ConfigError::Invalid(
                "always_dm_traceback and no_dm_traceback are mutually exclusive".into(),
            ));
        }
        if self.execution.step_budget == 0 {
            return Err(ConfigError::Invalid("execution.step_budget must be positive".into()));
        }
        if self.execution.timeit_max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "execution.timeit_max_iterations must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            step_budget: self.execution.step_budget,
            traceback_limit: self.execution.traceback_limit,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.delivery.max_retries,
            base_delay: Duration::from_millis(self.delivery.base_delay_ms),
        }
    }

    /// Shell options; colour codes survive only with `use_ansi_always`, and `use_ansi_never` wins
    pub fn shell_options(&self) -> ShellOptions {
        ShellOptions {
            timeout: Duration::from_secs(self.shell.timeout_secs),
            queue_capacity: self.shell.queue_capacity,
            keep_ansi_colour: self.use_ansi_always && !self.use_ansi_never,
            shell: None,
        }
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.pager.throttle_ms)
    }

    pub fn timeit_limits(&self) -> (usize, Duration) {
        (
            self.execution.timeit_max_iterations,
            Duration::from_secs(self.execution.timeit_max_secs),
        )
    }
}

/* ===================== Builder ===================== */

#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
    load_dotenv: bool,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            config_path: None,
            env: None,
            load_dotenv: true,
        }
    }
}

impl ConfigBuilder {
    /// Read this file instead of `REPLCOG_CONFIG_PATH`
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Use these variables instead of the process environment
    pub fn env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.env = Some(vars);
        self
    }

    pub fn skip_dotenv(mut self) -> Self {
        self.load_dotenv = false;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        if self.load_dotenv && self.env.is_none() {
            if let Ok(path) = dotenvy::dotenv() {
                debug!(path = %path.display(), "loaded .env");
            }
        }

        let path = self.config_path.or_else(|| {
            let from_env = match &self.env {
                Some(vars) => vars.get(CONFIG_PATH_ENV).cloned(),
                None => std::env::var(CONFIG_PATH_ENV).ok(),
            };
            from_env.filter(|p| !p.is_empty()).map(PathBuf::from)
        });

        let mut builder = config::Config::builder();
        if let Some(path) = &path {
            debug!(path = %path.display(), "reading config file");
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(self.env),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn from_env(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        Config::builder().env_vars(env(pairs)).build()
    }

    #[test]
    fn test_defaults() {
        let config = from_env(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert!(!config.retain);
        assert_eq!(config.scope_prefix(), "_");
        assert_eq!(config.pager.page_size, 1980);
        assert_eq!(config.pager.idle_timeout_secs, 7200);
        assert_eq!(config.shell.timeout_secs, 120);
        assert_eq!(config.throttle(), Duration::from_secs(1));
        assert_eq!(config.timeit_limits(), (10_000, Duration::from_secs(30)));
    }

    #[test]
    fn test_parse_flag_spellings() {
        for yes in ["true", "T", "yes", "Y", "on", "1", " True "] {
            assert_eq!(parse_flag(yes), Some(true), "{:?}", yes);
        }
        for no in ["false", "f", "NO", "n", "off", "0"] {
            assert_eq!(parse_flag(no), Some(false), "{:?}", no);
        }
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_env_overrides() {
        let config = from_env(&[
            ("REPLCOG_RETAIN", "yes"),
            ("REPLCOG_NO_UNDERSCORE", "t"),
            ("REPLCOG_FORCE_PAGINATOR", "1"),
            ("REPLCOG_PAGER__PAGE_SIZE", "1500"),
            ("REPLCOG_DELIVERY__MAX_RETRIES", "5"),
            ("UNRELATED", "x"),
        ])
        .unwrap();
        assert!(config.retain);
        assert!(config.no_underscore);
        assert!(config.force_paginator);
        assert_eq!(config.scope_prefix(), "");
        assert_eq!(config.pager.page_size, 1500);
        assert_eq!(config.retry_policy().max_retries, 5);
    }

    #[test]
    fn test_explicit_scope_prefix() {
        let config = from_env(&[("REPLCOG_SCOPE_PREFIX", "jsk_")]).unwrap();
        assert_eq!(config.scope_prefix(), "jsk_");
    }

    #[test]
    fn test_invalid_flag_rejected() {
        let err = from_env(&[("REPLCOG_RETAIN", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)), "{:?}", err);
    }

    #[test]
    fn test_page_size_must_fit_message() {
        let err = from_env(&[("REPLCOG_PAGER__PAGE_SIZE", "2100")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{:?}", err);
    }

    #[test]
    fn test_timeit_limits_from_env() {
        let config = from_env(&[
            ("REPLCOG_EXECUTION__TIMEIT_MAX_ITERATIONS", "50"),
            ("REPLCOG_EXECUTION__TIMEIT_MAX_SECS", "2"),
        ])
        .unwrap();
        assert_eq!(config.timeit_limits(), (50, Duration::from_secs(2)));

        let err = from_env(&[("REPLCOG_EXECUTION__TIMEIT_MAX_ITERATIONS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{:?}", err);
    }

    #[test]
    fn test_ansi_never_overrides_always() {
        let config = from_env(&[("REPLCOG_USE_ANSI_ALWAYS", "on")]).unwrap();
        assert!(config.shell_options().keep_ansi_colour);

        let config = from_env(&[
            ("REPLCOG_USE_ANSI_ALWAYS", "on"),
            ("REPLCOG_USE_ANSI_NEVER", "on"),
        ])
        .unwrap();
        assert!(!config.shell_options().keep_ansi_colour);

        let config = from_env(&[("REPLCOG_USE_ANSI_NEVER", "on")]).unwrap();
        assert!(!config.shell_options().keep_ansi_colour);
        assert!(!from_env(&[]).unwrap().shell_options().keep_ansi_colour);
    }

    #[test]
    fn test_file_then_env() {
        let path = std::env::temp_dir().join(format!("replcog-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "retain = true\nalways_dm_traceback = \"yes\"\n\n[pager]\npage_size = 1000\nthrottle_ms = 250\n",
        )
        .unwrap();

        let config = Config::builder()
            .env_vars(env(&[
                (CONFIG_PATH_ENV, path.to_str().unwrap()),
                ("REPLCOG_PAGER__PAGE_SIZE", "1200"),
            ]))
            .build();
        let _ = std::fs::remove_file(&path);
        let config = config.unwrap();

        assert!(config.retain);
        assert!(config.always_dm_traceback);
        assert_eq!(config.pager.page_size, 1200, "Environment wins over the file");
        assert_eq!(config.throttle(), Duration::from_millis(250));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Config::builder()
            .config_path(Some(PathBuf::from("/nonexistent/replcog.toml")))
            .env_vars(HashMap::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
