use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::linked_data::{Cid, CodecError};
use crate::store::StoreError;

use super::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum MfsError {
    #[error("entry already exists: {0}")]
    AlreadyExists(String),
    #[error("entry not found: {0}")]
    NotFound(String),
    #[error("link not found in store: {0}")]
    LinkNotFound(Cid),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("not a file: {0}")]
    NotAFile(String),
    #[error("invalid shard block {cid}: {reason}")]
    InvalidShard { cid: Cid, reason: String },
    #[error("invalid entry name: {0:?}")]
    InvalidName(String),
    #[error("cannot move '{from}' to '{to}': destination is inside source")]
    MoveIntoSelf { from: String, to: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("publish failed: {0}")]
    Publish(#[source] anyhow::Error),
}

impl MfsError {
    /// Wrap a store error with what we were doing at the time.
    ///  A missing block always surfaces as `LinkNotFound`.
    pub(crate) fn store(context: impl Into<String>, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(cid) => MfsError::LinkNotFound(cid),
            StoreError::Codec(err) => MfsError::Codec(err),
            source => MfsError::Store {
                context: context.into(),
                source,
            },
        }
    }

    /// Either flavour of lookup miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, MfsError::NotFound(_) | MfsError::LinkNotFound(_))
    }
}

/// Run `fut` unless `cancel` fires first
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, MfsError>
where
    F: Future<Output = Result<T, MfsError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MfsError::Cancelled),
        result = fut => result,
    }
}
