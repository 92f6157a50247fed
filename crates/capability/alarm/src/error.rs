use plcmon_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    #[error("alarm not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
