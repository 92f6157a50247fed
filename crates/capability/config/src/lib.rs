//! 应用运行配置加载与配置快照缓存。

mod snapshot;

pub use snapshot::{JsonFileSnapshotSource, SnapshotCache, SnapshotSource};

use std::env;
use std::path::PathBuf;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: String,
    pub snapshot_path: PathBuf,
    pub snapshot_ttl_seconds: u64,
    /// 未配置时使用内存存储。
    pub database_url: Option<String>,
    pub archive_dir: PathBuf,
    pub simulation: bool,
    pub simulation_seed: Option<u64>,
    pub reconnect_base_ms: u64,
    pub reconnect_max_attempts: u32,
    pub io_timeout_ms: u64,
    pub subscriber_capacity: usize,
    pub recorder_max_buffer_size: usize,
    pub recorder_max_buffer_age_ms: u64,
    pub recorder_flush_interval_ms: u64,
    pub archive_interval_seconds: u64,
    pub retention_days: u64,
    pub archive_compress: bool,
    pub archive_retention_days: u64,
    pub degraded_after_failures: u64,
    pub shutdown_timeout_ms: u64,
    pub mqtt_enabled: bool,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_prefix: String,
    pub mqtt_qos: u8,
}

impl AppConfig {
    /// 全部取默认值（嵌入式使用与测试）。
    pub fn with_defaults(snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            http_addr: "127.0.0.1:8080".to_string(),
            snapshot_path: snapshot_path.into(),
            snapshot_ttl_seconds: 60,
            database_url: None,
            archive_dir: PathBuf::from("data/archive"),
            simulation: false,
            simulation_seed: None,
            reconnect_base_ms: 5000,
            reconnect_max_attempts: 5,
            io_timeout_ms: 3000,
            subscriber_capacity: 1024,
            recorder_max_buffer_size: 1000,
            recorder_max_buffer_age_ms: 3_600_000,
            recorder_flush_interval_ms: 60_000,
            archive_interval_seconds: 86_400,
            retention_days: 30,
            archive_compress: true,
            archive_retention_days: 365,
            degraded_after_failures: 3,
            shutdown_timeout_ms: 5000,
            mqtt_enabled: false,
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            mqtt_topic_prefix: "plcmon".to_string(),
            mqtt_qos: 1,
        }
    }

    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let snapshot_path = env::var("PLCMON_SNAPSHOT_PATH")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::Missing("PLCMON_SNAPSHOT_PATH".to_string()))?;
        let http_addr =
            env::var("PLCMON_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let snapshot_ttl_seconds = read_u64_with_default("PLCMON_SNAPSHOT_TTL_SECONDS", 60)?;
        let database_url = read_optional("PLCMON_DATABASE_URL");
        let archive_dir = env::var("PLCMON_ARCHIVE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/archive"));
        let simulation = read_bool_with_default("PLCMON_SIMULATION", false);
        let simulation_seed = read_optional_u64("PLCMON_SIMULATION_SEED")?;
        let reconnect_base_ms = read_u64_with_default("PLCMON_RECONNECT_BASE_MS", 5000)?;
        let reconnect_max_attempts =
            read_u32_with_default("PLCMON_RECONNECT_MAX_ATTEMPTS", 5)?;
        let io_timeout_ms = read_u64_with_default("PLCMON_IO_TIMEOUT_MS", 3000)?;
        let subscriber_capacity =
            read_u64_with_default("PLCMON_SUBSCRIBER_CAPACITY", 1024)? as usize;
        let recorder_max_buffer_size =
            read_u64_with_default("PLCMON_RECORDER_MAX_BUFFER_SIZE", 1000)? as usize;
        let recorder_max_buffer_age_ms =
            read_u64_with_default("PLCMON_RECORDER_MAX_BUFFER_AGE_MS", 3_600_000)?;
        let recorder_flush_interval_ms =
            read_u64_with_default("PLCMON_RECORDER_FLUSH_INTERVAL_MS", 60_000)?;
        let archive_interval_seconds =
            read_u64_with_default("PLCMON_ARCHIVE_INTERVAL_SECONDS", 86_400)?;
        let retention_days = read_u64_with_default("PLCMON_RETENTION_DAYS", 30)?;
        let archive_compress = read_bool_with_default("PLCMON_ARCHIVE_COMPRESS", true);
        let archive_retention_days =
            read_u64_with_default("PLCMON_ARCHIVE_RETENTION_DAYS", 365)?;
        let degraded_after_failures =
            read_u64_with_default("PLCMON_DEGRADED_AFTER_FAILURES", 3)?;
        let shutdown_timeout_ms = read_u64_with_default("PLCMON_SHUTDOWN_TIMEOUT_MS", 5000)?;
        let mqtt_enabled = read_bool_with_default("PLCMON_MQTT_ENABLED", false);
        let mqtt_host = env::var("PLCMON_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("PLCMON_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("PLCMON_MQTT_USERNAME");
        let mqtt_password = read_optional("PLCMON_MQTT_PASSWORD");
        let mqtt_topic_prefix =
            env::var("PLCMON_MQTT_TOPIC_PREFIX").unwrap_or_else(|_| "plcmon".to_string());
        let mqtt_qos = read_u8_with_default("PLCMON_MQTT_QOS", 1)?;

        if reconnect_base_ms == 0 {
            return Err(ConfigError::Invalid(
                "PLCMON_RECONNECT_BASE_MS".to_string(),
                "0".to_string(),
            ));
        }

        Ok(Self {
            http_addr,
            snapshot_path,
            snapshot_ttl_seconds,
            database_url,
            archive_dir,
            simulation,
            simulation_seed,
            reconnect_base_ms,
            reconnect_max_attempts,
            io_timeout_ms,
            subscriber_capacity,
            recorder_max_buffer_size,
            recorder_max_buffer_age_ms,
            recorder_flush_interval_ms,
            archive_interval_seconds,
            retention_days,
            archive_compress,
            archive_retention_days,
            degraded_after_failures,
            shutdown_timeout_ms,
            mqtt_enabled,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic_prefix,
            mqtt_qos,
        })
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u8_with_default(key: &str, default: u8) -> Result<u8, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u8>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_optional_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key.to_string(), value)),
        Err(_) => Ok(None),
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
