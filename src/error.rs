// Error taxonomy for the publish pipeline.
//
// Every terminal condition of a run maps to one `PublishError` variant.
// Callers branch on `PublishError::kind` instead of digging into the
// transport-specific cause.

use crate::api::RegistryError;
use crate::storage::{InvalidConfig, TransportError};
use crate::store::StoreError;

/// Stable discriminator for `PublishError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Preflight,
    InvalidConfig,
    UploadFailed,
    AuthExpired,
    Registry,
    Store,
    Prompt,
}

/// Errors that end a publish run.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("preflight check failed: {0}")]
    Preflight(String),

    #[error("bad s3 config: {0}")]
    InvalidConfig(#[from] InvalidConfig),

    #[error("upload failed: {0}")]
    UploadFailed(#[source] TransportError),

    #[error("access token for app {app_id} was rejected and has been forgotten, run again to enter a new one")]
    AuthExpired {
        app_id: String,
        #[source]
        source: RegistryError,
    },

    #[error("testing group request failed: {0}")]
    Registry(#[source] RegistryError),

    #[error("settings store error: {0}")]
    Store(#[from] StoreError),

    #[error("prompt failed: {0}")]
    Prompt(#[source] std::io::Error),
}

impl PublishError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PublishError::Preflight(_) => ErrorKind::Preflight,
            PublishError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            PublishError::UploadFailed(_) => ErrorKind::UploadFailed,
            PublishError::AuthExpired { .. } => ErrorKind::AuthExpired,
            PublishError::Registry(_) => ErrorKind::Registry,
            PublishError::Store(_) => ErrorKind::Store,
            PublishError::Prompt(_) => ErrorKind::Prompt,
        }
    }
}
