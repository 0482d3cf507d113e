//! Configuration file support
//!
//! Settings are resolved per field, highest precedence first:
//! 1. Command-line flag (clap also folds in the environment variable here)
//! 2. Config file (`--config <file.toml>`)
//! 3. Built-in default
//!
//! Example:
//!
//! ```toml
//! concurrent = 8
//! log_level = "debug"
//! cache_dir = "/var/cache/go"
//! min_upload_size = 4096
//!
//! [remote]
//! endpoint = "https://s3.us-south.cloud-object-storage.appdomain.cloud"
//! bucket = "build-cache"
//! timeout_secs = 10
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use cacheprog_store::{RemoteConfig, TieredConfig};
use serde::Deserialize;
use thiserror::Error;

use crate::engine::EngineConfig;

/// Cache directory used when none is configured.
pub const DEFAULT_CACHE_DIR: &str = "/tmp/go-cache";

/// Log filter used when neither `RUST_LOG` nor a level is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Contents of a config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub concurrent: Option<usize>,
    pub log_level: Option<String>,
    pub logfile: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub min_upload_size: Option<u64>,
    pub remote: RemoteSection,
}

/// `[remote]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteSection {
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub api_key: Option<String>,
    pub resource_instance_id: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
}

/// Remote settings given on the command line or in the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOverrides {
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub api_key: Option<String>,
    pub resource_instance_id: Option<String>,
}

impl FileConfig {
    /// Load and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn engine_config(&self, concurrent: Option<usize>) -> EngineConfig {
        match concurrent.or(self.concurrent) {
            Some(workers) => EngineConfig::with_workers(workers),
            None => EngineConfig::default(),
        }
    }

    pub fn log_level(&self, level: Option<String>) -> String {
        level
            .or_else(|| self.log_level.clone())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
    }

    pub fn logfile(&self, logfile: Option<PathBuf>) -> Option<PathBuf> {
        logfile.or_else(|| self.logfile.clone())
    }

    pub fn cache_dir(&self, cache_dir: Option<PathBuf>) -> PathBuf {
        cache_dir
            .or_else(|| self.cache_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR))
    }

    pub fn tiered_config(&self, min_upload_size: Option<u64>) -> TieredConfig {
        match min_upload_size.or(self.min_upload_size) {
            Some(min_upload_size) => TieredConfig { min_upload_size },
            None => TieredConfig::default(),
        }
    }

    /// Remote connection settings. Missing endpoint or bucket stay empty
    /// and are rejected when the remote is built.
    pub fn remote_config(&self, overrides: RemoteOverrides) -> RemoteConfig {
        let section = &self.remote;
        let defaults = RemoteConfig::default();

        RemoteConfig {
            endpoint: overrides
                .endpoint
                .or_else(|| section.endpoint.clone())
                .unwrap_or_default(),
            bucket: overrides
                .bucket
                .or_else(|| section.bucket.clone())
                .unwrap_or_default(),
            api_key: overrides.api_key.or_else(|| section.api_key.clone()),
            resource_instance_id: overrides
                .resource_instance_id
                .or_else(|| section.resource_instance_id.clone()),
            timeout_secs: section.timeout_secs.unwrap_or(defaults.timeout_secs),
            max_retries: section.max_retries.unwrap_or(defaults.max_retries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
concurrent = 8
log_level = "debug"
cache_dir = "/var/cache/go"
min_upload_size = 4096

[remote]
endpoint = "https://objects.example.com"
bucket = "build-cache"
api_key = "from-file"
timeout_secs = 10
"#;

    #[test]
    fn test_parse_full_file() {
        let config = FileConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.concurrent, Some(8));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/var/cache/go")));
        assert_eq!(config.remote.bucket.as_deref(), Some("build-cache"));
        assert_eq!(config.remote.max_retries, None);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(FileConfig::parse("concurency = 3").is_err());
    }

    #[test]
    fn test_defaults_without_file() {
        let config = FileConfig::default();
        assert_eq!(config.cache_dir(None), PathBuf::from(DEFAULT_CACHE_DIR));
        assert_eq!(config.log_level(None), DEFAULT_LOG_LEVEL);
        assert_eq!(config.engine_config(None), EngineConfig::default());
        assert_eq!(config.tiered_config(None), TieredConfig::default());
        assert_eq!(config.logfile(None), None);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let config = FileConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.engine_config(None).workers, 8);
        assert_eq!(config.log_level(None), "debug");
        assert_eq!(config.tiered_config(None).min_upload_size, 4096);

        let remote = config.remote_config(RemoteOverrides::default());
        assert_eq!(remote.endpoint, "https://objects.example.com");
        assert_eq!(remote.api_key.as_deref(), Some("from-file"));
        assert_eq!(remote.timeout_secs, 10);
        assert_eq!(remote.max_retries, RemoteConfig::default().max_retries);
    }

    #[test]
    fn test_flags_override_file() {
        let config = FileConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.engine_config(Some(2)).workers, 2);
        assert_eq!(
            config.cache_dir(Some(PathBuf::from("/tmp/other"))),
            PathBuf::from("/tmp/other")
        );
        assert_eq!(config.tiered_config(Some(0)).min_upload_size, 0);

        let remote = config.remote_config(RemoteOverrides {
            bucket: Some("override".to_string()),
            api_key: Some("from-env".to_string()),
            ..Default::default()
        });
        assert_eq!(remote.bucket, "override");
        assert_eq!(remote.api_key.as_deref(), Some("from-env"));
        assert_eq!(remote.endpoint, "https://objects.example.com");
    }
}
