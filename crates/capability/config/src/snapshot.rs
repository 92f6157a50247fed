//! 配置快照来源与带过期时间的缓存。

use async_trait::async_trait;
use domain::{ConfigSnapshot, ConfigurationError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// 配置快照来源（外部配置存储）。
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn load(&self) -> Result<ConfigSnapshot, ConfigurationError>;
}

/// JSON 文件快照来源。
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotSource {
    path: PathBuf,
}

impl JsonFileSnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotSource for JsonFileSnapshotSource {
    async fn load(&self) -> Result<ConfigSnapshot, ConfigurationError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            ConfigurationError::Source(format!("{}: {}", self.path.display(), err))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            ConfigurationError::Source(format!("{}: {}", self.path.display(), err))
        })
    }
}

struct CacheEntry {
    value: Arc<ConfigSnapshot>,
    expires_at: Instant,
}

/// 配置快照缓存：`{value, expires_at}`，单一访问入口 + 主动失效。
///
/// 新快照校验失败时保留上一份有效快照。
pub struct SnapshotCache {
    source: Arc<dyn SnapshotSource>,
    ttl: Duration,
    entry: Mutex<Option<CacheEntry>>,
}

impl SnapshotCache {
    pub fn new(source: Arc<dyn SnapshotSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// 未过期直接返回缓存；过期则重新加载。
    ///
    /// 重新加载失败且存在旧快照时返回旧快照。
    pub async fn get_or_refresh(&self) -> Result<Arc<ConfigSnapshot>, ConfigurationError> {
        let mut entry = self.entry.lock().await;
        if let Some(current) = entry.as_ref() {
            if Instant::now() < current.expires_at {
                return Ok(current.value.clone());
            }
        }
        match self.load_validated().await {
            Ok(snapshot) => Ok(self.store(&mut entry, snapshot)),
            Err(err) => match entry.as_mut() {
                Some(current) => {
                    warn!(target: "plcmon.config", error = %err, "snapshot_rejected_keep_last_good");
                    current.expires_at = Instant::now() + self.ttl;
                    Ok(current.value.clone())
                }
                None => Err(err),
            },
        }
    }

    /// 强制重新加载；失败时保留旧快照并返回错误。
    pub async fn refresh(&self) -> Result<Arc<ConfigSnapshot>, ConfigurationError> {
        let mut entry = self.entry.lock().await;
        match self.load_validated().await {
            Ok(snapshot) => Ok(self.store(&mut entry, snapshot)),
            Err(err) => {
                warn!(target: "plcmon.config", error = %err, "snapshot_rejected_keep_last_good");
                Err(err)
            }
        }
    }

    /// 使缓存立即过期，下一次访问重新加载。
    pub async fn invalidate(&self) {
        if let Some(current) = self.entry.lock().await.as_mut() {
            current.expires_at = Instant::now();
        }
    }

    /// 当前缓存的快照（不触发加载）。
    pub async fn current(&self) -> Option<Arc<ConfigSnapshot>> {
        self.entry
            .lock()
            .await
            .as_ref()
            .map(|current| current.value.clone())
    }

    async fn load_validated(&self) -> Result<ConfigSnapshot, ConfigurationError> {
        let snapshot = self.source.load().await?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    fn store(&self, entry: &mut Option<CacheEntry>, snapshot: ConfigSnapshot) -> Arc<ConfigSnapshot> {
        let value = Arc::new(snapshot);
        info!(
            target: "plcmon.config",
            endpoints = value.plc_endpoints.len(),
            tags = value.tags.len(),
            rules = value.alarm_rules.len(),
            "snapshot_loaded"
        );
        *entry = Some(CacheEntry {
            value: value.clone(),
            expires_at: Instant::now() + self.ttl,
        });
        value
    }
}
