use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::linked_data::Cid;
use crate::store::{put_block, NodeStore};

use super::config::MfsConfig;
use super::directory::Directory;
use super::error::MfsError;
use super::node::DirNode;
use super::republisher::{Publisher, Republisher};

enum Publishing {
    None,
    Immediate(Arc<dyn Publisher>),
    Debounced(Republisher),
}

/// Top of a mutable filesystem.
///
/// Owns the top-level [`Directory`] and tells an optional [`Publisher`]
///  whenever a flush produces a new root identifier, either right away or
///  through a debounced background worker depending on
///  [`PublishConfig::debounce`](super::PublishConfig).
pub struct Root {
    directory: Directory,
    publishing: Publishing,
    // last identifier handed to the publisher (or queued for it)
    last_published: Mutex<Option<Cid>>,
}

impl std::fmt::Debug for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Root")
            .field("directory", &self.directory)
            .finish()
    }
}

impl Root {
    /// Open the directory stored at `cid` as the top of a filesystem.
    ///  `cid` counts as already published.
    pub async fn new(
        store: Arc<dyn NodeStore>,
        cid: Cid,
        publisher: Option<Arc<dyn Publisher>>,
        config: MfsConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, MfsError> {
        config.validate()?;
        let publishing = match publisher {
            None => Publishing::None,
            Some(publisher) if config.publish.debounce => {
                Publishing::Debounced(Republisher::spawn(publisher, config.publish.clone()))
            }
            Some(publisher) => Publishing::Immediate(publisher),
        };
        let directory = Directory::load(store, Arc::new(config), cid, cancel).await?;
        tracing::debug!("Root::new: opened {}", cid);
        Ok(Self {
            directory,
            publishing,
            last_published: Mutex::new(Some(cid)),
        })
    }

    /// Store an empty directory and open it as a new filesystem
    pub async fn empty(
        store: Arc<dyn NodeStore>,
        publisher: Option<Arc<dyn Publisher>>,
        config: MfsConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, MfsError> {
        let cid = put_block(store.as_ref(), &DirNode::default())
            .await
            .map_err(|e| MfsError::store("storing empty root", e))?;
        Self::new(store, cid, publisher, config, cancel).await
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub async fn last_published(&self) -> Option<Cid> {
        *self.last_published.lock().await
    }

    /// Flush the whole tree and publish the result if it changed.
    ///
    /// With immediate publishing a publisher failure is returned and the
    ///  identifier is not recorded as published, so the next flush tries
    ///  again.
    pub async fn flush(&self, cancel: &CancellationToken) -> Result<Cid, MfsError> {
        let cid = self.directory.flush(cancel).await?;

        let mut last_published = self.last_published.lock().await;
        if *last_published == Some(cid) {
            return Ok(cid);
        }
        match &self.publishing {
            Publishing::None => {}
            Publishing::Immediate(publisher) => {
                tracing::info!("Root::flush: publishing {}", cid);
                publisher.publish(cid).await.map_err(|e| {
                    tracing::warn!("Root::flush: failed to publish {}: {}", cid, e);
                    MfsError::Publish(e)
                })?;
            }
            Publishing::Debounced(republisher) => republisher.update(cid),
        }
        *last_published = Some(cid);
        Ok(cid)
    }

    /// Flush, publish anything still pending and shut down
    pub async fn close(self, cancel: &CancellationToken) -> Result<Cid, MfsError> {
        let cid = self.flush(cancel).await?;
        if let Publishing::Debounced(republisher) = self.publishing {
            republisher.close().await?;
        }
        Ok(cid)
    }
}
