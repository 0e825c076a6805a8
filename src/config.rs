/*!
 * Configuration types for orbit-vfs
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{VfsError, VfsResult};
use crate::retry::{ExponentialBackoff, NoRetry, RetryPolicy};

/// Smallest copy buffer accepted; smaller values are raised to this
pub const MIN_BUFFER_SIZE: usize = 256;

/// Smallest multipart part size accepted by S3-compatible stores (5 MiB)
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Backend options shared by every file system implementation
///
/// Loaded from TOML, overridden from `ORBIT_VFS_*` environment variables,
/// or built in code. Changing the options of a file system drops its cached
/// client so the next operation rebuilds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Retry settings applied to remote metadata, listing and copy calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Buffer size for buffered (cross-backend) copies, in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Part size for multipart uploads, in bytes
    #[serde(default = "default_part_size")]
    pub part_size: usize,

    /// Directory for local spill files (None = system temp dir)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Identity of the credentials in use; files that share a backend and
    /// this identity are copied server-side
    #[serde(default)]
    pub credentials_id: Option<String>,

    /// Custom endpoint (MinIO, LocalStack, fake-gcs-server)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Region for S3-compatible stores
    #[serde(default)]
    pub region: Option<String>,

    /// Explicit access key
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Explicit secret key
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Session token for temporary credentials
    #[serde(default)]
    pub session_token: Option<String>,

    /// Path to a credentials file (service account JSON for GCS)
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    /// Use path-style addressing (required by MinIO)
    #[serde(default)]
    pub force_path_style: bool,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            buffer_size: default_buffer_size(),
            part_size: default_part_size(),
            temp_dir: None,
            credentials_id: None,
            endpoint: None,
            region: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            credentials_file: None,
            force_path_style: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl Options {
    /// Parse options from a TOML document
    pub fn from_toml_str(contents: &str) -> VfsResult<Self> {
        let options: Options = toml::from_str(contents)
            .map_err(|e| VfsError::Config(format!("Invalid options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a TOML file
    pub fn from_file(path: &Path) -> VfsResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            VfsError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Overlay `ORBIT_VFS_*` environment variables
    pub fn apply_env(mut self) -> VfsResult<Self> {
        self.apply_vars(|name| std::env::var(name).ok())?;
        Ok(self)
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> VfsResult<()> {
        if let Some(v) = lookup("ORBIT_VFS_ENDPOINT") {
            self.endpoint = Some(v);
        }
        if let Some(v) = lookup("ORBIT_VFS_REGION") {
            self.region = Some(v);
        }
        if let Some(v) = lookup("ORBIT_VFS_ACCESS_KEY_ID") {
            self.access_key_id = Some(v);
        }
        if let Some(v) = lookup("ORBIT_VFS_SECRET_ACCESS_KEY") {
            self.secret_access_key = Some(v);
        }
        if let Some(v) = lookup("ORBIT_VFS_CREDENTIALS_FILE") {
            self.credentials_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ORBIT_VFS_TEMP_DIR") {
            self.temp_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ORBIT_VFS_BUFFER_SIZE") {
            self.buffer_size = v
                .parse()
                .map_err(|_| VfsError::Config(format!("Invalid ORBIT_VFS_BUFFER_SIZE: {}", v)))?;
        }
        if let Some(v) = lookup("ORBIT_VFS_RETRY_ATTEMPTS") {
            self.retry.attempts = v.parse().map_err(|_| {
                VfsError::Config(format!("Invalid ORBIT_VFS_RETRY_ATTEMPTS: {}", v))
            })?;
        }
        self.validate()
    }

    /// Check option consistency
    pub fn validate(&self) -> VfsResult<()> {
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(VfsError::Config(
                "access_key_id and secret_access_key must be set together".to_string(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(VfsError::Config(
                "retry.max_delay_ms must be >= retry.initial_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy buffer size with the documented minimum applied
    pub fn effective_buffer_size(&self) -> usize {
        self.buffer_size.max(MIN_BUFFER_SIZE)
    }

    /// Multipart part size with the store minimum applied
    pub fn effective_part_size(&self) -> usize {
        self.part_size.max(MIN_PART_SIZE)
    }

    /// Credential identity used for same-backend copy decisions
    ///
    /// An explicit `credentials_id` wins, then the credentials file path,
    /// then the access key. No identity means ambient credentials.
    pub fn credential_identity(&self) -> Option<String> {
        self.credentials_id
            .clone()
            .or_else(|| {
                self.credentials_file
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned())
            })
            .or_else(|| self.access_key_id.clone())
    }

    pub fn with_credentials_id(mut self, id: impl Into<String>) -> Self {
        self.credentials_id = Some(id.into());
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of retries after the first attempt (0 = no retry)
    #[serde(default)]
    pub attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Add random jitter to each delay
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 0,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Build the retry policy described by this configuration
    pub fn policy(&self) -> Arc<dyn RetryPolicy> {
        if self.attempts == 0 {
            return Arc::new(NoRetry);
        }
        Arc::new(
            ExponentialBackoff::new(self.attempts)
                .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
                .with_max_delay(Duration::from_millis(self.max_delay_ms))
                .with_jitter(self.jitter),
        )
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Minimum level
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_buffer_size() -> usize {
    256 * 1024
}

fn default_part_size() -> usize {
    MIN_PART_SIZE
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_values() {
        let options = Options::default();
        assert_eq!(options.buffer_size, 256 * 1024);
        assert_eq!(options.part_size, MIN_PART_SIZE);
        assert_eq!(options.retry.attempts, 0);
        assert!(options.credential_identity().is_none());
    }

    #[test]
    fn test_buffer_size_minimum() {
        let options = Options::default().with_buffer_size(16);
        assert_eq!(options.effective_buffer_size(), MIN_BUFFER_SIZE);
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            buffer_size = 4096
            region = "us-east-1"
            credentials_file = "/etc/gcs/key.json"

            [retry]
            attempts = 4
            initial_delay_ms = 50
            max_delay_ms = 800

            [logging]
            level = "debug"
        "#;

        let options = Options::from_toml_str(toml_str).unwrap();
        assert_eq!(options.buffer_size, 4096);
        assert_eq!(options.region.as_deref(), Some("us-east-1"));
        assert_eq!(options.retry.attempts, 4);
        assert_eq!(options.logging.level, LogLevel::Debug);
        assert_eq!(
            options.credential_identity().as_deref(),
            Some("/etc/gcs/key.json")
        );
    }

    #[test]
    fn test_half_configured_keys_rejected() {
        let toml_str = r#"access_key_id = "AKIA""#;
        assert!(matches!(
            Options::from_toml_str(toml_str),
            Err(VfsError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ORBIT_VFS_REGION", "eu-west-1"),
            ("ORBIT_VFS_BUFFER_SIZE", "1024"),
            ("ORBIT_VFS_RETRY_ATTEMPTS", "2"),
        ]
        .into_iter()
        .collect();

        let mut options = Options::default();
        options
            .apply_vars(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(options.region.as_deref(), Some("eu-west-1"));
        assert_eq!(options.buffer_size, 1024);
        assert_eq!(options.retry.attempts, 2);
    }

    #[test]
    fn test_bad_env_value() {
        let mut options = Options::default();
        let result = options.apply_vars(|name| {
            (name == "ORBIT_VFS_BUFFER_SIZE").then(|| "lots".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let options = Options::default().with_credentials_id("ci");
        let toml = toml::to_string(&options).unwrap();
        let parsed: Options = toml::from_str(&toml).unwrap();
        assert_eq!(options, parsed);
    }

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(LogLevel::Warn.to_tracing_level(), tracing::Level::WARN);
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }
}
