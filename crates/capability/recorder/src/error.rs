use plcmon_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// 落库失败；缓冲数据保留待重试。
    #[error("flush failed for {point_id}: {source}")]
    Flush {
        point_id: String,
        #[source]
        source: StorageError,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("serialize failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
