use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub aws: AwsConfig,
    pub ingress: IngressConfig,
    pub pool: PoolConfig,
    pub playback: PlaybackConfig,
    pub stream_key: StreamKeyConfig,
    pub logging: LoggingConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("database", &"<redacted>")
            .field("aws", &self.aws)
            .field("ingress", &self.ingress)
            .field("pool", &self.pool)
            .field("playback", &"<redacted>")
            .field("stream_key", &"<redacted>")
            .field("logging", &self.logging)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
        }
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .finish()
    }
}

/// Upstream provider settings (single configured region)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub region: String,
    /// Optional named credentials profile (`aws sso login --profile <profile>`)
    pub profile: String,
    /// Optional endpoint override for local emulators
    pub endpoint_url: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            profile: String::new(),
            endpoint_url: String::new(),
        }
    }
}

/// Ingress endpoints and optional upstream resource bindings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    /// Fixed global WHIP ingest endpoint, returned verbatim to publishers.
    /// The upstream 307-redirects to a regional endpoint on first POST.
    pub whip_endpoint: String,
    /// Pre-existing stage shared by all children when set (skips per-child
    /// stage creation)
    pub default_stage_arn: String,
    /// S3 storage configuration ARN for session recordings
    pub storage_arn: String,
    /// IVS channel ARN for HLS composition output
    pub channel_arn: String,
    /// Environment tag stamped on created stages (dev/staging/prod)
    pub environment: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            whip_endpoint: "https://global.whip.live-video.net".to_string(),
            default_stage_arn: String::new(),
            storage_arn: String::new(),
            channel_arn: String::new(),
            environment: "dev".to_string(),
        }
    }
}

/// Stage pool sizing and pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle stages the replenishment loop aims to keep warm
    pub target_pool_size: usize,
    /// Hard ceiling on stages owned by this service
    pub max_pool_size: usize,
    /// Name prefix identifying pool-owned stages; must be globally unique
    /// to this service so restarted processes can recover their stages
    pub stage_prefix: String,
    pub replenish_interval_secs: u64,
    /// Idle stages older than this are deleted by the cleanup pass
    pub stage_max_age_secs: u64,
    /// Stages created per replenishment tick
    pub create_batch_limit: usize,
    /// Sleep between successive creates, staying under the upstream
    /// create-rate limit (~5 TPS)
    pub create_spacing_ms: u64,
    /// Aged-out stages deleted per cleanup pass
    pub cleanup_batch_limit: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target_pool_size: 50,
            max_pool_size: 200,
            stage_prefix: "kid-stream".to_string(),
            replenish_interval_secs: 30,
            stage_max_age_secs: 3600,
            create_batch_limit: 5,
            create_spacing_ms: 250,
            cleanup_batch_limit: 3,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub const fn replenish_interval(&self) -> Duration {
        Duration::from_secs(self.replenish_interval_secs)
    }

    #[must_use]
    pub fn stage_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stage_max_age_secs as i64)
    }

    #[must_use]
    pub const fn create_spacing(&self) -> Duration {
        Duration::from_millis(self.create_spacing_ms)
    }
}

/// Private HLS playback signing
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// ES384 private key, PEM encoded (SEC1 or PKCS#8)
    pub signing_key: String,
    /// Playback key pair id, stamped into the JWT `kid` header
    pub key_pair_id: String,
}

impl std::fmt::Debug for PlaybackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackConfig")
            .field("signing_key", &"<redacted>")
            .field("key_pair_id", &self.key_pair_id)
            .finish()
    }
}

/// Stream key encryption (legacy RTMPS path)
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamKeyConfig {
    /// 64-char hex string (32-byte AES-256 key)
    pub encryption_key: String,
}

impl std::fmt::Debug for StreamKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamKeyConfig")
            .field("encryption_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" (production) or "pretty" (development)
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional file plus `SUBSTREAM_*`
    /// environment overrides
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, config::FileFormat::Toml));
            }
        }

        // SUBSTREAM_DATABASE_URL, SUBSTREAM_AWS_REGION, ...
        builder = builder.add_source(
            Environment::with_prefix("SUBSTREAM")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Fail fast on misconfigurations that would only surface mid-request
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.pool.max_pool_size < self.pool.target_pool_size {
            errors.push(format!(
                "pool.max_pool_size ({}) must be >= pool.target_pool_size ({})",
                self.pool.max_pool_size, self.pool.target_pool_size
            ));
        }
        if self.pool.stage_prefix.is_empty() {
            errors.push("pool.stage_prefix must not be empty".to_string());
        }
        if self.pool.create_batch_limit == 0 {
            errors.push("pool.create_batch_limit must be at least 1".to_string());
        }
        if self.aws.region.is_empty() {
            errors.push("aws.region must be set".to_string());
        }
        if !self.stream_key.encryption_key.is_empty()
            && (self.stream_key.encryption_key.len() != 64
                || hex::decode(&self.stream_key.encryption_key).is_err())
        {
            errors.push("stream_key.encryption_key must be a 64-char hex string".to_string());
        }
        if self.playback.signing_key.is_empty() != self.playback.key_pair_id.is_empty() {
            errors.push(
                "playback.signing_key and playback.key_pair_id must be set together".to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
