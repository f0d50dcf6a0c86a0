use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::linked_data::{Cid, LD_RAW_CODEC};
use crate::store::NodeStore;

use super::directory::{mark_ancestors_dirty, DirectoryInner};
use super::error::{cancellable, MfsError};
use super::node::NodeLink;
use super::staged::{Commit, Staged};

/// Store `data` as a raw blob and return a link that can be handed
///  to [`Directory::add_child`](super::Directory::add_child)
pub async fn store_file(
    store: &dyn NodeStore,
    data: impl Into<Bytes>,
) -> Result<NodeLink, MfsError> {
    let data: Bytes = data.into();
    let size = data.len() as u64;
    let cid = store
        .put(LD_RAW_CODEC, data.to_vec())
        .await
        .map_err(|e| MfsError::store("storing file content", e))?;
    Ok(NodeLink::new_file(cid, size))
}

/// Whole-object handle over a file's content.
///
/// There is no partial write: `set_content` swaps the blob wholesale and the
///  next flush stores it.
#[derive(Clone)]
pub struct File(Arc<FileInner>);

pub(crate) struct FileInner {
    store: Arc<dyn NodeStore>,
    parent: parking_lot::Mutex<Weak<DirectoryInner>>,
    state: Mutex<FileState>,
}

struct FileState {
    cid: Option<Cid>,
    size: u64,
    // cached content; always present while dirty
    content: Option<Bytes>,
    epoch: u64,
    flushed_epoch: u64,
}

impl FileState {
    fn is_dirty(&self) -> bool {
        self.cid.is_none() || self.epoch != self.flushed_epoch
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("ptr", &Arc::as_ptr(&self.0))
            .finish()
    }
}

impl File {
    /// A new, unflushed file
    pub(crate) fn new(
        store: Arc<dyn NodeStore>,
        data: Bytes,
        parent: Weak<DirectoryInner>,
    ) -> Self {
        let size = data.len() as u64;
        Self(Arc::new(FileInner {
            store,
            parent: parking_lot::Mutex::new(parent),
            state: Mutex::new(FileState {
                cid: None,
                size,
                content: Some(data),
                epoch: 1,
                flushed_epoch: 0,
            }),
        }))
    }

    /// A handle over content that already lives in the store
    pub(crate) fn from_link(
        store: Arc<dyn NodeStore>,
        cid: Cid,
        size: u64,
        parent: Weak<DirectoryInner>,
    ) -> Self {
        Self(Arc::new(FileInner {
            store,
            parent: parking_lot::Mutex::new(parent),
            state: Mutex::new(FileState {
                cid: Some(cid),
                size,
                content: None,
                epoch: 0,
                flushed_epoch: 0,
            }),
        }))
    }

    pub async fn cid(&self) -> Option<Cid> {
        self.0.state.lock().await.cid
    }

    pub async fn size(&self) -> u64 {
        self.0.state.lock().await.size
    }

    pub async fn is_dirty(&self) -> bool {
        self.0.state.lock().await.is_dirty()
    }

    pub fn ptr_eq(&self, other: &File) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn set_parent(&self, parent: Weak<DirectoryInner>) {
        *self.0.parent.lock() = parent;
    }

    /// Read the whole content, fetching it from the store on first access
    pub async fn content(&self, cancel: &CancellationToken) -> Result<Bytes, MfsError> {
        let mut state = self.0.state.lock().await;
        if let Some(content) = &state.content {
            return Ok(content.clone());
        }
        let cid = state
            .cid
            .ok_or_else(|| MfsError::NotFound("file has no content".to_string()))?;
        let store = self.0.store.clone();
        let data = cancellable(cancel, async move {
            store
                .get(&cid)
                .await
                .map_err(|e| MfsError::store("reading file content", e))
        })
        .await?;
        state.content = Some(data.clone());
        Ok(data)
    }

    /// Replace the file's content. Nothing is written until the next flush.
    pub async fn set_content(&self, data: impl Into<Bytes>) {
        let data: Bytes = data.into();
        {
            let mut state = self.0.state.lock().await;
            state.size = data.len() as u64;
            state.content = Some(data);
            state.epoch += 1;
        }
        let parent = self.0.parent.lock().upgrade();
        mark_ancestors_dirty(parent).await;
    }

    /// Write pending content to the store
    pub async fn flush(&self, cancel: &CancellationToken) -> Result<Cid, MfsError> {
        let mut staged = Staged::default();
        let (cid, _, _) = self.prepare_flush(cancel, &mut staged).await?;
        staged.commit(cancel).await?;
        Ok(cid)
    }

    /// Store pending content and stage the new identifier.
    ///  Returns the identifier with the size and epoch it belongs to.
    pub(crate) async fn prepare_flush(
        &self,
        cancel: &CancellationToken,
        staged: &mut Staged,
    ) -> Result<(Cid, u64, u64), MfsError> {
        let (data, size, epoch) = {
            let state = self.0.state.lock().await;
            if let (false, Some(cid)) = (state.is_dirty(), state.cid) {
                return Ok((cid, state.size, state.flushed_epoch));
            }
            let data = state
                .content
                .clone()
                .ok_or_else(|| MfsError::NotFound("file has no content".to_string()))?;
            (data, state.size, state.epoch)
        };
        let store = self.0.store.clone();
        let cid = cancellable(cancel, async move {
            store
                .put(LD_RAW_CODEC, data.to_vec())
                .await
                .map_err(|e| MfsError::store("flushing file", e))
        })
        .await?;
        tracing::debug!("File::flush: stored {} ({} bytes)", cid, size);
        staged.push(Commit::File {
            file: self.clone(),
            cid,
            epoch,
        });
        Ok((cid, size, epoch))
    }

    /// Record a stored identifier unless a newer one got there first
    pub(crate) async fn commit(&self, cid: Cid, epoch: u64) {
        let mut state = self.0.state.lock().await;
        if state.cid.is_none() || epoch > state.flushed_epoch {
            state.cid = Some(cid);
            state.flushed_epoch = epoch;
        }
    }
}
