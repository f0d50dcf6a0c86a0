use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::linked_data::Cid;

use super::directory::{Directory, DirectoryInner};
use super::error::MfsError;
use super::file::File;
use super::node::{NodeKind, NodeLink};
use super::staged::Staged;

/// A live handle to a child of a directory
#[derive(Clone, Debug)]
pub enum FsNode {
    File(File),
    Dir(Directory),
}

impl FsNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            FsNode::File(_) => NodeKind::File,
            FsNode::Dir(_) => NodeKind::Dir,
        }
    }

    pub fn as_dir(&self) -> Option<&Directory> {
        match self {
            FsNode::Dir(dir) => Some(dir),
            FsNode::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&File> {
        match self {
            FsNode::File(file) => Some(file),
            FsNode::Dir(_) => None,
        }
    }

    pub fn into_dir(self, name: &str) -> Result<Directory, MfsError> {
        match self {
            FsNode::Dir(dir) => Ok(dir),
            FsNode::File(_) => Err(MfsError::NotADirectory(name.to_string())),
        }
    }

    pub fn into_file(self, name: &str) -> Result<File, MfsError> {
        match self {
            FsNode::File(file) => Ok(file),
            FsNode::Dir(_) => Err(MfsError::NotAFile(name.to_string())),
        }
    }

    /// Last flushed identifier, `None` if never flushed
    pub async fn cid(&self) -> Option<Cid> {
        match self {
            FsNode::File(file) => file.cid().await,
            FsNode::Dir(dir) => dir.cid().await,
        }
    }

    pub async fn is_dirty(&self) -> bool {
        match self {
            FsNode::File(file) => file.is_dirty().await,
            FsNode::Dir(dir) => dir.is_dirty().await,
        }
    }

    /// Flush and return the link a parent should record for this node
    pub async fn flush(&self, cancel: &CancellationToken) -> Result<NodeLink, MfsError> {
        let mut staged = Staged::default();
        let (link, _) = self.prepare_flush(cancel, &mut staged).await?;
        staged.commit(cancel).await?;
        Ok(link)
    }

    /// Store this node and everything dirty below it, staging what to
    ///  record. Returns the link with the epoch it is current for.
    pub(crate) fn prepare_flush<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        staged: &'a mut Staged,
    ) -> BoxFuture<'a, Result<(NodeLink, u64), MfsError>> {
        Box::pin(async move {
            match self {
                FsNode::File(file) => {
                    let (cid, size, epoch) = file.prepare_flush(cancel, staged).await?;
                    Ok((NodeLink::new_file(cid, size), epoch))
                }
                FsNode::Dir(dir) => {
                    let (cid, epoch) = dir.prepare_flush(cancel, staged).await?;
                    Ok((NodeLink::new_dir(cid), epoch))
                }
            }
        })
    }

    /// Whether both handles point at the same in-memory node
    pub fn ptr_eq(&self, other: &FsNode) -> bool {
        match (self, other) {
            (FsNode::File(a), FsNode::File(b)) => a.ptr_eq(b),
            (FsNode::Dir(a), FsNode::Dir(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub(crate) fn set_parent(&self, parent: Weak<DirectoryInner>) {
        match self {
            FsNode::File(file) => file.set_parent(parent),
            FsNode::Dir(dir) => dir.set_parent(parent),
        }
    }
}

/// A directory listing row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
    // stale or missing while the child has unflushed changes
    pub cid: Option<Cid>,
    pub size: u64,
}

/// A named slot in a directory.
///
/// `cid` is the last identifier we know for the child, and `link_epoch` the
///  child epoch it was recorded at. The slot starts out
///  empty for children that only exist in the store, and is filled the first
///  time someone resolves the child. The `OnceCell` gives us the
///  unresolved / resolving / resolved states: concurrent resolvers all wait on
///  the first one and end up with the same handle.
#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) kind: NodeKind,
    pub(crate) cid: Option<Cid>,
    pub(crate) size: u64,
    pub(crate) link_epoch: u64,
    pub(crate) slot: Arc<OnceCell<FsNode>>,
}

impl Entry {
    pub(crate) fn from_link(link: &NodeLink) -> Self {
        Self {
            kind: link.kind(),
            cid: Some(*link.cid()),
            size: link.size(),
            link_epoch: 0,
            slot: Arc::new(OnceCell::new()),
        }
    }

    pub(crate) fn resolved(node: FsNode, size: u64) -> Self {
        Self {
            kind: node.kind(),
            cid: None,
            size,
            link_epoch: 0,
            slot: Arc::new(OnceCell::new_with(Some(node))),
        }
    }

    pub(crate) fn link(&self) -> Option<NodeLink> {
        self.cid.map(|cid| match self.kind {
            NodeKind::File => NodeLink::new_file(cid, self.size),
            NodeKind::Dir => NodeLink::new_dir(cid),
        })
    }

    pub(crate) fn handle(&self) -> Option<&FsNode> {
        self.slot.get()
    }

    /// Whether this entry's slot currently holds `node`
    pub(crate) fn holds(&self, node: &FsNode) -> bool {
        self.handle().map(|h| h.ptr_eq(node)).unwrap_or(false)
    }

    pub(crate) fn listing(&self, name: &str) -> DirEntry {
        DirEntry {
            name: name.to_string(),
            kind: self.kind,
            cid: self.cid,
            size: self.size,
        }
    }
}
