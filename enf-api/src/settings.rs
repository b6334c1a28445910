//! Typed settings, built once from an [`EnfConfigSnapshot`].
//!
//! Every component takes its own settings struct as a parameter; this module
//! is the only place that knows the configuration keys.

use std::time::Duration;

use enf_blob::{BlobConfig, S3Config};
use enf_core::{EnfConfig, EnfConfigSnapshot};
use enf_queue::QueueConfig;

use crate::providers::eso::EsoConfig;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3030;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://enf.db?mode=rwc";

/// Parameters of the extraction step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchSettings {
    /// Harmonic of the nominal frequency the query trace is read from.
    pub harmonic: u32,
    /// Sample rate the recording is decimated to before analysis, in Hz.
    pub target_rate: u32,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            harmonic: 2,
            target_rate: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobBackend {
    Memory,
    S3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackendKind {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub host: String,
    pub port: u16,
}

impl HttpSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Everything the binary needs to assemble the service.
#[derive(Debug, Clone)]
pub struct Settings {
    pub http: HttpSettings,
    pub database_url: String,
    pub blob_backend: BlobBackend,
    pub blob: BlobConfig,
    pub s3: S3Config,
    pub queue_backend: QueueBackendKind,
    pub queue: QueueConfig,
    pub matching: MatchSettings,
    pub eso: EsoConfig,
}

impl Settings {
    /// Build from the `ENF__*` process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = EnfConfig::new();
        config.load_env();
        Self::from_snapshot(&config.snapshot())
    }

    pub fn from_snapshot(snap: &EnfConfigSnapshot) -> anyhow::Result<Self> {
        let http = HttpSettings {
            host: snap
                .get_string("http.host")
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parsed(snap, "http.port")?.unwrap_or(DEFAULT_PORT),
        };

        let blob_backend = match snap.get("blob.backend").unwrap_or("memory") {
            "memory" => BlobBackend::Memory,
            "s3" => BlobBackend::S3,
            other => anyhow::bail!("blob.backend must be 'memory' or 's3', got '{other}'"),
        };

        let mut blob = BlobConfig::default();
        if let Some(max) = parsed(snap, "upload.max_bytes")? {
            blob = blob.with_max_blob_bytes(max);
        }

        let mut s3 = S3Config::new(snap.get_string("blob.bucket").unwrap_or_default());
        if let Some(region) = snap.get_string("s3.region") {
            s3.region = region;
        }
        s3.endpoint_url = snap.get_string("s3.endpoint_url");
        s3.access_key_id = snap.get_string("s3.access_key_id");
        s3.secret_access_key = snap.get_string("s3.secret_access_key");
        if let Some(path_style) = parsed(snap, "s3.force_path_style")? {
            s3.force_path_style = path_style;
        }

        let queue_backend = match snap.get("queue.backend").unwrap_or("memory") {
            "memory" => QueueBackendKind::Memory,
            "sqlite" => QueueBackendKind::Sqlite,
            other => anyhow::bail!("queue.backend must be 'memory' or 'sqlite', got '{other}'"),
        };

        let mut queue = QueueConfig::default();
        if let Some(workers) = parsed(snap, "queue.workers")? {
            queue.workers = workers;
        }
        if let Some(ms) = parsed(snap, "queue.poll_interval_ms")? {
            queue.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parsed(snap, "queue.lease_timeout_secs")? {
            queue.lease_timeout = Duration::from_secs(secs);
        }

        let mut matching = MatchSettings::default();
        if let Some(harmonic) = parsed(snap, "match.harmonic")? {
            matching.harmonic = harmonic;
        }
        if let Some(rate) = parsed(snap, "match.target_rate")? {
            matching.target_rate = rate;
        }
        if matching.harmonic == 0 || matching.target_rate == 0 {
            anyhow::bail!("match.harmonic and match.target_rate must be positive");
        }

        let mut eso = EsoConfig::default();
        if let Some(url) = snap.get_string("eso.base_url") {
            eso.base_url = url;
        }
        if let Some(secs) = parsed(snap, "eso.timeout_secs")? {
            eso.timeout = Duration::from_secs(secs);
        }

        Ok(Self {
            http,
            database_url: snap
                .get_string("database.url")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            blob_backend,
            blob,
            s3,
            queue_backend,
            queue,
            matching,
            eso,
        })
    }
}

/// A present but unparsable value is an error, not a silent default.
fn parsed<T>(snap: &EnfConfigSnapshot, key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    snap.get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("invalid value for '{key}': {e}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pairs: &[(&str, &str)]) -> EnfConfigSnapshot {
        let mut config = EnfConfig::new();
        for (k, v) in pairs {
            config.set(*k, *v);
        }
        config.snapshot()
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let settings = Settings::from_snapshot(&snapshot(&[])).unwrap();
        assert_eq!(settings.http.addr(), "127.0.0.1:3030");
        assert_eq!(settings.blob_backend, BlobBackend::Memory);
        assert_eq!(settings.queue_backend, QueueBackendKind::Memory);
        assert_eq!(settings.queue.workers, 2);
        assert_eq!(settings.matching, MatchSettings::default());
        assert_eq!(settings.blob.max_blob_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn explicit_values_flow_into_component_settings() {
        let settings = Settings::from_snapshot(&snapshot(&[
            ("http.port", "8080"),
            ("queue.backend", "sqlite"),
            ("queue.workers", "6"),
            ("queue.poll_interval_ms", "250"),
            ("queue.lease_timeout_secs", "90"),
            ("match.harmonic", "3"),
            ("upload.max_bytes", "1024"),
            ("blob.backend", "s3"),
            ("blob.bucket", "enf-uploads"),
            ("s3.endpoint_url", "http://localhost:9000"),
        ]))
        .unwrap();

        assert_eq!(settings.http.port, 8080);
        assert_eq!(settings.queue_backend, QueueBackendKind::Sqlite);
        assert_eq!(settings.queue.workers, 6);
        assert_eq!(settings.queue.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.queue.lease_timeout, Duration::from_secs(90));
        assert_eq!(settings.matching.harmonic, 3);
        assert_eq!(settings.blob.max_blob_bytes, 1024);
        assert_eq!(settings.s3.bucket, "enf-uploads");
        assert_eq!(settings.s3.endpoint_url.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn garbage_is_reported_with_its_key() {
        let err = Settings::from_snapshot(&snapshot(&[("queue.workers", "many")])).unwrap_err();
        assert!(err.to_string().contains("queue.workers"));

        assert!(Settings::from_snapshot(&snapshot(&[("blob.backend", "ftp")])).is_err());
        assert!(Settings::from_snapshot(&snapshot(&[("match.target_rate", "0")])).is_err());
    }
}
