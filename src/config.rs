//! Engine configuration and typed plugin settings.
use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};

use crate::error::ConfigError;
use crate::promise::DEFAULT_WARN_AFTER;

/// Settings for the [`Engine`](crate::Engine).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Worker threads, defaults to half the available parallelism, at least 2.
    pub workers: Option<usize>,
    /// Seconds a product read waits before logging that it is still waiting.
    #[serde(rename = "promise_warn_secs", with = "seconds")]
    pub promise_warn_after: Duration,
    /// Report tasks that have not started yet as not run once a task fails.
    pub fail_fast: bool,
    /// Attach a progress bar to the build span.
    pub progress: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            promise_warn_after: DEFAULT_WARN_AFTER,
            fail_fast: false,
            progress: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(ConfigError::Engine)
    }

    /// Effective pool size. An explicit worker count is taken as is.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(workers) => workers.max(1),
            None => std::thread::available_parallelism()
                .map(|n| n.get() / 2)
                .unwrap_or(1)
                .max(2),
        }
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        if secs <= 0.0 {
            return Err(serde::de::Error::custom(format!(
                "expected a positive number of seconds, got {secs}"
            )));
        }

        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// String-keyed plugin settings, turned into a typed struct by
/// [`Settings::parse`].
///
/// Values are strings as they come from build files or the command line.
/// Parsing infers booleans and numbers, so a struct field `threads: u32`
/// accepts `"4"`, and unknown or missing fields fail through serde.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    plugin: String,
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        let object: Map<String, Value> = self
            .values
            .iter()
            .map(|(key, value)| (key.clone(), infer(value)))
            .collect();

        serde_json::from_value(Value::Object(object)).map_err(|source| ConfigError::Settings {
            plugin: self.plugin.clone(),
            source,
        })
    }
}

impl<K, V> Extend<(K, V)> for Settings
where
    K: Into<String>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.values
            .extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
    }
}

fn infer(value: &str) -> Value {
    match value {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(int) = value.parse::<i64>() {
                Value::Number(int.into())
            } else if let Some(float) = value.parse::<f64>().ok().and_then(Number::from_f64) {
                Value::Number(float)
            } else {
                Value::String(value.to_string())
            }
        }
    }
}
