//! Application configuration loaded from environment variables.
//!
//! Defaults are conservative: local storage backend, 2 workers, no hardware
//! acceleration.

use crate::{Error, Result};

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment environment name (development, production, ...).
    pub environment: String,
    /// API server port.
    pub port: u16,
    /// Database URL (SQLite).
    pub database_url: String,
    /// Storage backend configuration.
    pub storage: StorageConfig,
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: String,
    /// Executor worker pool size.
    pub worker_concurrency: usize,
    /// Queue weighting for critical:default:low.
    pub queue_weights: QueueWeights,
    /// CPU thread cap passed to the media tool (0 = auto).
    pub max_threads: u32,
    /// Default hardware acceleration toggle.
    pub use_hardware_accel: bool,
    /// Prefer faster encoder presets over smaller output.
    pub prefer_fast_presets: bool,
    /// Maximum accepted upload size in bytes.
    pub max_upload_size: i64,
    /// Maximum concurrent jobs per tenant.
    pub max_jobs_per_tenant: u32,
    /// Allowed CORS origins.
    pub allowed_origins: Vec<String>,
}

/// Storage backend selection and credentials.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Backend selector: "local", "s3" or "supabase".
    pub backend: String,
    /// Base path for the local backend.
    pub base_path: String,
    pub s3_endpoint: String,
    pub s3_bucket: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub s3_region: String,
}

/// Worker-time share per queue class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueWeights {
    pub critical: u32,
    pub default: u32,
    pub low: u32,
}

impl Default for QueueWeights {
    fn default() -> Self {
        Self {
            critical: 6,
            default: 3,
            low: 1,
        }
    }
}

impl QueueWeights {
    /// Parse a "6:3:1" style weighting string.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(Error::config(format!(
                "invalid queue weights '{}', expected critical:default:low",
                s
            )));
        }
        let parse_one = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| Error::config(format!("invalid queue weight '{}'", part)))
        };
        Ok(Self {
            critical: parse_one(parts[0])?,
            default: parse_one(parts[1])?,
            low: parse_one(parts[2])?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            port: 8080,
            database_url: "sqlite:mediaconv.db?mode=rwc".to_string(),
            storage: StorageConfig {
                backend: "local".to_string(),
                base_path: "./data".to_string(),
                s3_endpoint: String::new(),
                s3_bucket: String::new(),
                s3_access_key: String::new(),
                s3_secret_key: String::new(),
                s3_region: "us-east-1".to_string(),
            },
            ffmpeg_path: "ffmpeg".to_string(),
            worker_concurrency: 2,
            queue_weights: QueueWeights::default(),
            max_threads: 0,
            use_hardware_accel: false,
            prefer_fast_presets: true,
            max_upload_size: 5 * 1024 * 1024 * 1024,
            max_jobs_per_tenant: 20,
            allowed_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

impl Config {
    /// Load configuration from the environment, reading `.env` if present.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let queue_weights = match std::env::var("QUEUE_WEIGHTS") {
            Ok(raw) => QueueWeights::parse(&raw)?,
            Err(_) => QueueWeights::default(),
        };

        Ok(Self {
            environment: get_env("ENVIRONMENT", &defaults.environment),
            port: get_env_parsed("PORT", defaults.port),
            database_url: get_env("DATABASE_URL", &defaults.database_url),
            storage: StorageConfig {
                backend: get_env("STORAGE_BACKEND", &defaults.storage.backend),
                base_path: get_env("STORAGE_BASE_PATH", &defaults.storage.base_path),
                s3_endpoint: get_env("S3_ENDPOINT", ""),
                s3_bucket: get_env("S3_BUCKET", ""),
                s3_access_key: get_env("S3_ACCESS_KEY", ""),
                s3_secret_key: get_env("S3_SECRET_KEY", ""),
                s3_region: get_env("S3_REGION", &defaults.storage.s3_region),
            },
            ffmpeg_path: get_env("FFMPEG_PATH", &defaults.ffmpeg_path),
            worker_concurrency: get_env_parsed("WORKER_CONCURRENCY", defaults.worker_concurrency),
            queue_weights,
            max_threads: get_env_parsed("MAX_THREADS", defaults.max_threads),
            use_hardware_accel: get_env_bool("USE_HARDWARE_ACCEL", defaults.use_hardware_accel),
            prefer_fast_presets: get_env_bool("PREFER_FAST_PRESETS", defaults.prefer_fast_presets),
            max_upload_size: get_env_parsed("MAX_UPLOAD_SIZE", defaults.max_upload_size),
            max_jobs_per_tenant: get_env_parsed("MAX_JOBS_PER_TENANT", defaults.max_jobs_per_tenant),
            allowed_origins: get_env("ALLOWED_ORIGINS", "http://localhost:5173")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }
}

fn get_env(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn get_env_parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_conservative() {
        let config = Config::default();
        assert_eq!(config.storage.backend, "local");
        assert_eq!(config.worker_concurrency, 2);
        assert!(!config.use_hardware_accel);
        assert_eq!(config.queue_weights, QueueWeights::default());
    }

    #[test]
    fn test_queue_weights_parse() {
        let weights = QueueWeights::parse("6:3:1").unwrap();
        assert_eq!(weights.critical, 6);
        assert_eq!(weights.default, 3);
        assert_eq!(weights.low, 1);

        let weights = QueueWeights::parse(" 4 : 2 : 1 ").unwrap();
        assert_eq!(weights.critical, 4);

        assert!(QueueWeights::parse("6:3").is_err());
        assert!(QueueWeights::parse("a:b:c").is_err());
    }
}
