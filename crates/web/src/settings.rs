//! Application settings.
//!
//! Settings are a flat string-keyed map, set in code or loaded from a TOML
//! table such as
//!
//! ```toml
//! "trust proxy" = true
//! "keep-alive timeout" = 10
//! "bind address" = "0.0.0.0:8080"
//! ```
//!
//! Values are kept as strings and parsed by the typed getters, so an invalid
//! value is reported when the server reads it.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::SettingsError;
use crate::router::RouterOptions;

pub const TRUST_PROXY: &str = "trust proxy";
pub const CASE_SENSITIVE_ROUTING: &str = "case sensitive routing";
pub const STRICT_ROUTING: &str = "strict routing";
pub const KEEP_ALIVE_TIMEOUT: &str = "keep-alive timeout";
pub const ADMISSION_LIMIT: &str = "admission limit";
pub const BIND_ADDRESS: &str = "bind address";

const DEFAULT_KEEP_ALIVE_SECS: u64 = 5;
const DEFAULT_ADMISSION_LIMIT: usize = 16;
const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a TOML table of scalar values.
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let table: BTreeMap<String, toml::Value> = toml::from_str(content)?;

        let mut settings = Self::new();
        for (key, value) in table {
            let value = match value {
                toml::Value::String(value) => value,
                toml::Value::Integer(value) => value.to_string(),
                toml::Value::Float(value) => value.to_string(),
                toml::Value::Boolean(value) => value.to_string(),
                other => {
                    return Err(SettingsError::InvalidValue {
                        key,
                        value: other.to_string(),
                        expected: "a string, number or boolean",
                    });
                }
            };
            settings.values.insert(key, value);
        }
        Ok(settings)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), count = settings.values.len(), "loaded settings");
        Ok(settings)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Builder form of [`Settings::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn enable(&mut self, key: impl Into<String>) -> &mut Self {
        self.set(key, "true")
    }

    pub fn disable(&mut self, key: impl Into<String>) -> &mut Self {
        self.set(key, "false")
    }

    /// True only for a value of `true`.
    pub fn enabled(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    pub fn trust_proxy(&self) -> Result<bool, SettingsError> {
        self.flag(TRUST_PROXY)
    }

    pub fn router_options(&self) -> Result<RouterOptions, SettingsError> {
        Ok(RouterOptions { case_sensitive: self.flag(CASE_SENSITIVE_ROUTING)?, strict: self.flag(STRICT_ROUTING)? })
    }

    /// How long a connection may sit idle waiting for its next request.
    pub fn keep_alive_timeout(&self) -> Result<Duration, SettingsError> {
        match self.get(KEEP_ALIVE_TIMEOUT) {
            None => Ok(Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS)),
            Some(value) => value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| invalid(KEEP_ALIVE_TIMEOUT, value, "a positive number of seconds")),
        }
    }

    /// Number of accepts kept pending at the same time.
    pub fn admission_limit(&self) -> Result<usize, SettingsError> {
        match self.get(ADMISSION_LIMIT) {
            None => Ok(DEFAULT_ADMISSION_LIMIT),
            Some(value) => value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|limit| *limit > 0)
                .ok_or_else(|| invalid(ADMISSION_LIMIT, value, "a positive integer")),
        }
    }

    pub fn bind_address(&self) -> &str {
        self.get(BIND_ADDRESS).unwrap_or(DEFAULT_BIND_ADDRESS)
    }

    fn flag(&self, key: &str) -> Result<bool, SettingsError> {
        match self.get(key) {
            None | Some("false") => Ok(false),
            Some("true") => Ok(true),
            Some(value) => Err(invalid(key, value, "true or false")),
        }
    }
}

fn invalid(key: &str, value: &str, expected: &'static str) -> SettingsError {
    SettingsError::InvalidValue { key: key.to_string(), value: value.to_string(), expected }
}
