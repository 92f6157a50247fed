use domain::ConfigurationError;
use plcmon_protocol::TransportError;
use plcmon_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("configuration rejected: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),
}
