//! # Configuration
//!
//! A minimal string key/value store. Keys are dotted (`http.port`,
//! `queue.workers`) and can be layered from any source; the usual source is the
//! process environment, where `ENF__QUEUE__WORKERS=4` becomes `queue.workers`.
//!
//! ```rust
//! use enf_core::EnfConfig;
//!
//! let mut config = EnfConfig::new();
//! config.set("queue.workers", "4");
//!
//! let snapshot = config.snapshot();
//! assert_eq!(snapshot.get_usize("queue.workers"), Some(4));
//! ```
//!
//! Components never read the store directly; the application turns a
//! snapshot into the typed settings each component takes as a parameter.

use std::collections::HashMap;

/// Environment prefix recognised by [`EnfConfig::load_env`].
pub const ENV_PREFIX: &str = "ENF__";

#[derive(Debug, Default)]
pub struct EnfConfig {
    values: HashMap<String, String>,
}

impl EnfConfig {
    /// Create an empty config store.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Set a configuration key to a string value.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    /// Set a key only when it is not present yet.
    pub fn set_default<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.entry(key.into()).or_insert_with(|| value.into());
    }

    /// Get a configuration value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Check whether a key is present.
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Import every `ENF__A__B=value` variable as `a.b = value`.
    pub fn load_env(&mut self) {
        self.load_vars(std::env::vars());
    }

    /// Same as [`load_env`](Self::load_env) over an explicit set of variables.
    pub fn load_vars<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                self.set(normalized, value);
            }
        }
    }

    pub fn snapshot(&self) -> EnfConfigSnapshot {
        EnfConfigSnapshot::new(self.values.clone())
    }
}

/// Read-only copy of the configuration, cheap to hand to components.
#[derive(Debug, Clone, Default)]
pub struct EnfConfigSnapshot {
    map: HashMap<String, String>,
}

impl EnfConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.parse::<f64>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.parse::<bool>().ok())
    }
}
