use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

use crate::linked_data::{Cid, LD_DAG_CBOR_CODEC};
use crate::store::{get_block, put_block, NodeStore};

use super::config::MfsConfig;
use super::entry::{DirEntry, Entry, FsNode};
use super::error::{cancellable, MfsError};
use super::file::File;
use super::node::{BasicNode, DirNode, NodeKind, NodeLink};
use super::shard::{hash_name, InsertError, LinkOverrides, Shard, StoredShards, Unloaded};
use super::staged::{Commit, Staged};

// rough encoded size of one link, not counting the name
const LINK_SIZE_ESTIMATE: usize = 48;

fn entry_cost(name: &str) -> usize {
    name.len() + LINK_SIZE_ESTIMATE
}

pub(crate) fn validate_name(name: &str) -> Result<(), MfsError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(MfsError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Bump the dirty epoch of `next` and every directory above it
pub(crate) async fn mark_ancestors_dirty(mut next: Option<Arc<DirectoryInner>>) {
    while let Some(dir) = next {
        dir.state.lock().await.touch();
        next = dir.parent.lock().upgrade();
    }
}

enum Repr {
    Inline(BTreeMap<String, Entry>),
    Sharded(Shard),
}

impl Repr {
    fn get(&self, name: &str) -> Result<Option<&Entry>, Unloaded> {
        match self {
            Repr::Inline(entries) => Ok(entries.get(name)),
            Repr::Sharded(shard) => shard.get(name, &hash_name(name), &mut Vec::new()),
        }
    }

    fn get_mut(&mut self, name: &str) -> Result<Option<&mut Entry>, Unloaded> {
        match self {
            Repr::Inline(entries) => Ok(entries.get_mut(name)),
            Repr::Sharded(shard) => shard.get_mut(name, &hash_name(name), &mut Vec::new()),
        }
    }

    fn insert(&mut self, name: String, entry: Entry) -> Result<(), InsertError> {
        match self {
            Repr::Inline(entries) => {
                if entries.contains_key(&name) {
                    return Err(InsertError::Exists(entry));
                }
                entries.insert(name, entry);
                Ok(())
            }
            Repr::Sharded(shard) => {
                let hash = hash_name(&name);
                shard.insert(name, &hash, entry, &mut Vec::new())
            }
        }
    }

    fn remove(&mut self, name: &str) -> Result<Option<Entry>, Unloaded> {
        match self {
            Repr::Inline(entries) => Ok(entries.remove(name)),
            Repr::Sharded(shard) => shard.remove(name, &hash_name(name), &mut Vec::new()),
        }
    }

    fn resolved(&self) -> Vec<(String, FsNode)> {
        let mut out = Vec::new();
        match self {
            Repr::Inline(entries) => {
                out.extend(entries.iter().filter_map(|(name, entry)| {
                    entry.handle().map(|node| (name.clone(), node.clone()))
                }));
            }
            Repr::Sharded(shard) => shard.resolved(&mut out),
        }
        out
    }

    fn names(&self) -> Result<Vec<String>, Unloaded> {
        match self {
            Repr::Inline(entries) => Ok(entries.keys().cloned().collect()),
            Repr::Sharded(shard) => shard.names(),
        }
    }

    fn entries(&self) -> Result<Vec<DirEntry>, Unloaded> {
        match self {
            Repr::Inline(entries) => Ok(entries
                .iter()
                .map(|(name, entry)| entry.listing(name))
                .collect()),
            Repr::Sharded(shard) => shard.entries(),
        }
    }

    /// Encode and store this directory with `overrides` in place of the
    ///  entries' own links, returning its identifier and any shard blocks
    ///  stored on the way. `Ok(None)` if some entry has never been flushed.
    async fn store(
        &self,
        store: &dyn NodeStore,
        overrides: &LinkOverrides,
    ) -> Result<Option<(Cid, StoredShards)>, MfsError> {
        match self {
            Repr::Inline(entries) => {
                let mut links = BTreeMap::new();
                for (name, entry) in entries {
                    let link = overrides.get(name).copied().or_else(|| entry.link());
                    let Some(link) = link else {
                        return Ok(None);
                    };
                    links.insert(name.clone(), link);
                }
                let node = DirNode::Basic(BasicNode { links });
                let cid = put_block(store, &node)
                    .await
                    .map_err(|e| MfsError::store("storing directory", e))?;
                Ok(Some((cid, Vec::new())))
            }
            Repr::Sharded(shard) => {
                let touched = overrides.keys().map(|name| hash_name(name)).collect();
                let mut stored = Vec::new();
                let cid = shard
                    .store(store, overrides, touched, Vec::new(), &mut stored)
                    .await?;
                Ok(cid.map(|cid| (cid, stored)))
            }
        }
    }
}

struct DirState {
    // last flushed identifier
    cid: Option<Cid>,
    repr: Repr,
    // estimated encoded size while inline
    inline_size: usize,
    // bumped on every change to this directory or below it
    epoch: u64,
    // epoch observed by the last successful flush
    flushed_epoch: u64,
}

impl DirState {
    fn is_dirty(&self) -> bool {
        self.cid.is_none() || self.epoch != self.flushed_epoch
    }

    fn touch(&mut self) {
        self.epoch += 1;
    }

    fn insert(
        &mut self,
        name: String,
        entry: Entry,
        config: &MfsConfig,
    ) -> Result<(), InsertError> {
        let cost = entry_cost(&name);
        self.repr.insert(name, entry)?;
        if let Repr::Inline(entries) = &mut self.repr {
            self.inline_size += cost;
            if self.inline_size > config.shard_threshold_bytes {
                let count = entries.len();
                let entries = std::mem::take(entries);
                self.repr = Repr::Sharded(Shard::from_entries(
                    entries,
                    0,
                    config.shard_width_bits,
                    config.shard_bucket_size,
                ));
                tracing::debug!(
                    "DirState::insert: sharding directory with {} entries (~{} bytes)",
                    count,
                    self.inline_size
                );
            }
        }
        self.touch();
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<Option<Entry>, Unloaded> {
        let removed = self.repr.remove(name)?;
        if removed.is_some() {
            if let Repr::Inline(_) = self.repr {
                self.inline_size = self.inline_size.saturating_sub(entry_cost(name));
            }
            self.touch();
        }
        Ok(removed)
    }

    /// Child links that differ from what their entries record, for entries
    ///  that still hold the flushed node and have nothing newer recorded
    fn overrides(&self, children: &[ChildLink]) -> LinkOverrides {
        children
            .iter()
            .filter(|child| match self.repr.get(&child.name) {
                Ok(Some(entry)) => {
                    entry.holds(&child.node)
                        && child.epoch >= entry.link_epoch
                        && entry.link() != Some(child.link)
                }
                _ => false,
            })
            .map(|child| (child.name.clone(), child.link))
            .collect()
    }

    /// Record a flushed child link. Returns whether the entry now
    ///  carries that link.
    fn apply_child_link(&mut self, child: &ChildLink) -> bool {
        let link_epoch = match self.repr.get(&child.name) {
            Ok(Some(entry)) if entry.holds(&child.node) => {
                if entry.link() == Some(child.link) {
                    return true;
                }
                entry.link_epoch
            }
            _ => return false,
        };
        if child.epoch < link_epoch {
            return false;
        }
        match self.repr.get_mut(&child.name) {
            Ok(Some(entry)) => {
                entry.cid = Some(*child.link.cid());
                entry.size = child.link.size();
                entry.link_epoch = child.epoch;
                true
            }
            _ => false,
        }
    }
}

/// A child flushed as part of its parent's flush
pub(crate) struct ChildLink {
    name: String,
    node: FsNode,
    link: NodeLink,
    epoch: u64,
}

/// What a directory flush stored, to be recorded once the whole flush is done
pub(crate) struct DirRecord {
    cid: Cid,
    // epoch the flush started from
    epoch: u64,
    // epoch when the block was encoded
    encoded_epoch: u64,
    children: Vec<ChildLink>,
    shards: StoredShards,
}

/// What a resolver needs to know about an entry, copied out
///  so the directory lock is not held while resolving
struct ChildRef {
    slot: Arc<OnceCell<FsNode>>,
    kind: NodeKind,
    cid: Option<Cid>,
    size: u64,
}

impl ChildRef {
    fn of(entry: &Entry) -> Self {
        Self {
            slot: entry.slot.clone(),
            kind: entry.kind,
            cid: entry.cid,
            size: entry.size,
        }
    }
}

pub(crate) struct DirectoryInner {
    store: Arc<dyn NodeStore>,
    config: Arc<MfsConfig>,
    parent: parking_lot::Mutex<Weak<DirectoryInner>>,
    // guards entries, representation and dirty state
    state: Mutex<DirState>,
}

/// A mutable directory handle.
///
/// Cheap to clone; clones share the same directory. Every operation takes
///  this directory's lock for its own duration only, so work on different
///  directories never contends, and nothing holds a lock while walking into
///  children.
#[derive(Clone)]
pub struct Directory(Arc<DirectoryInner>);

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("ptr", &Arc::as_ptr(&self.0))
            .finish()
    }
}

/// Names in a directory, captured when listed.
///
/// Finite and restartable: [`Names::reset`] rewinds to the first name.
///  Order is deterministic for a given set of entries.
#[derive(Debug, Clone)]
pub struct Names {
    names: Arc<[String]>,
    position: usize,
}

impl Names {
    fn new(names: Vec<String>) -> Self {
        Self {
            names: names.into(),
            position: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }
}

impl Iterator for Names {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        let name = self.names.get(self.position)?.clone();
        self.position += 1;
        Some(name)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.names.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Names {}

impl Directory {
    /// A new, empty, never flushed directory
    pub(crate) fn new_empty(
        store: Arc<dyn NodeStore>,
        config: Arc<MfsConfig>,
        parent: Weak<DirectoryInner>,
    ) -> Self {
        Self::with_state(
            store,
            config,
            parent,
            DirState {
                cid: None,
                repr: Repr::Inline(BTreeMap::new()),
                inline_size: 0,
                epoch: 1,
                flushed_epoch: 0,
            },
        )
    }

    fn with_state(
        store: Arc<dyn NodeStore>,
        config: Arc<MfsConfig>,
        parent: Weak<DirectoryInner>,
        state: DirState,
    ) -> Self {
        Self(Arc::new(DirectoryInner {
            store,
            config,
            parent: parking_lot::Mutex::new(parent),
            state: Mutex::new(state),
        }))
    }

    fn from_node(
        store: Arc<dyn NodeStore>,
        config: Arc<MfsConfig>,
        cid: Cid,
        node: DirNode,
        parent: Weak<DirectoryInner>,
    ) -> Result<Self, MfsError> {
        let (repr, inline_size) = match node {
            DirNode::Basic(BasicNode { links }) => {
                let inline_size = links.keys().map(|name| entry_cost(name)).sum();
                let entries = links
                    .into_iter()
                    .map(|(name, link)| (name, Entry::from_link(&link)))
                    .collect();
                (Repr::Inline(entries), inline_size)
            }
            DirNode::Shard(node) => {
                // deeper shard blocks are not directories on their own
                let shard = Shard::from_node(node, cid, 0, config.shard_bucket_size)?;
                (Repr::Sharded(shard), 0)
            }
        };
        Ok(Self::with_state(
            store,
            config,
            parent,
            DirState {
                cid: Some(cid),
                repr,
                inline_size,
                epoch: 0,
                flushed_epoch: 0,
            },
        ))
    }

    /// Load a directory node from the store as a detached top-level directory
    pub(crate) async fn load(
        store: Arc<dyn NodeStore>,
        config: Arc<MfsConfig>,
        cid: Cid,
        cancel: &CancellationToken,
    ) -> Result<Self, MfsError> {
        let node = Self::fetch_node(&store, cid, "loading directory", cancel).await?;
        Self::from_node(store, config, cid, node, Weak::new())
    }

    async fn fetch_node(
        store: &Arc<dyn NodeStore>,
        cid: Cid,
        context: &'static str,
        cancel: &CancellationToken,
    ) -> Result<DirNode, MfsError> {
        if cid.codec() != LD_DAG_CBOR_CODEC {
            return Err(MfsError::NotADirectory(cid.to_string()));
        }
        tracing::debug!("Directory::fetch_node: {} {}", context, cid);
        let store = store.clone();
        cancellable(cancel, async move {
            get_block::<DirNode>(store.as_ref(), &cid)
                .await
                .map_err(|e| MfsError::store(context, e))
        })
        .await
    }

    /// Last flushed identifier, `None` if never flushed
    pub async fn cid(&self) -> Option<Cid> {
        self.0.state.lock().await.cid
    }

    pub async fn is_dirty(&self) -> bool {
        self.0.state.lock().await.is_dirty()
    }

    pub async fn is_sharded(&self) -> bool {
        matches!(self.0.state.lock().await.repr, Repr::Sharded(_))
    }

    /// Whether both handles point at the same in-memory directory
    pub fn ptr_eq(&self, other: &Directory) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn set_parent(&self, parent: Weak<DirectoryInner>) {
        *self.0.parent.lock() = parent;
    }

    pub(crate) fn weak(&self) -> Weak<DirectoryInner> {
        Arc::downgrade(&self.0)
    }

    async fn mark_parent_dirty(&self) {
        let parent = self.0.parent.lock().upgrade();
        mark_ancestors_dirty(parent).await;
    }

    /// Fetch a child shard block and swap it in.
    ///  The lock is only taken once the block is in hand.
    async fn load_shard(
        &self,
        unloaded: Unloaded,
        cancel: &CancellationToken,
    ) -> Result<(), MfsError> {
        let node = Self::fetch_node(&self.0.store, unloaded.cid, "loading shard", cancel).await?;
        let DirNode::Shard(node) = node else {
            return Err(MfsError::NotADirectory(unloaded.cid.to_string()));
        };
        let depth = unloaded.path.len() as u32;
        let shard = Shard::from_node(node, unloaded.cid, depth, self.0.config.shard_bucket_size)?;
        let mut state = self.0.state.lock().await;
        if let Repr::Sharded(root) = &mut state.repr {
            if root.width_bits() != shard.width_bits() {
                return Err(MfsError::InvalidShard {
                    cid: unloaded.cid,
                    reason: format!(
                        "width {} under a shard of width {}",
                        shard.width_bits(),
                        root.width_bits()
                    ),
                });
            }
            root.install(&unloaded.path, &unloaded.cid, shard);
        }
        Ok(())
    }

    /// Copy out what is needed to resolve `name`, loading shards as needed
    async fn child_ref(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ChildRef, MfsError> {
        loop {
            let unloaded = {
                let state = self.0.state.lock().await;
                match state.repr.get(name) {
                    Ok(Some(entry)) => return Ok(ChildRef::of(entry)),
                    Ok(None) => return Err(MfsError::NotFound(name.to_string())),
                    Err(unloaded) => unloaded,
                }
            };
            self.load_shard(unloaded, cancel).await?;
        }
    }

    /// Materialize an entry's handle. Concurrent callers share the first
    ///  caller's work and get the same handle back.
    async fn resolve(
        &self,
        name: &str,
        child: ChildRef,
        cancel: &CancellationToken,
    ) -> Result<FsNode, MfsError> {
        let ChildRef {
            slot,
            kind,
            cid,
            size,
        } = child;
        let node = slot
            .get_or_try_init::<MfsError, _, _>(|| async move {
                // fresh entries are created resolved, so this one is in the store
                let cid = cid.ok_or_else(|| MfsError::NotFound(name.to_string()))?;
                match kind {
                    NodeKind::File => Ok(FsNode::File(File::from_link(
                        self.0.store.clone(),
                        cid,
                        size,
                        self.weak(),
                    ))),
                    NodeKind::Dir => {
                        let node =
                            Self::fetch_node(&self.0.store, cid, "resolving directory", cancel)
                                .await?;
                        let dir = Directory::from_node(
                            self.0.store.clone(),
                            self.0.config.clone(),
                            cid,
                            node,
                            self.weak(),
                        )?;
                        Ok(FsNode::Dir(dir))
                    }
                }
            })
            .await?;
        Ok(node.clone())
    }

    /// Insert an entry, handing it back on failure
    async fn insert_entry(
        &self,
        name: &str,
        mut entry: Entry,
        cancel: &CancellationToken,
    ) -> Result<(), (MfsError, Entry)> {
        loop {
            let unloaded = {
                let mut state = self.0.state.lock().await;
                match state.insert(name.to_string(), entry, &self.0.config) {
                    Ok(()) => break,
                    Err(InsertError::Exists(back)) => {
                        return Err((MfsError::AlreadyExists(name.to_string()), back))
                    }
                    Err(InsertError::Unloaded(unloaded, back)) => {
                        entry = back;
                        unloaded
                    }
                }
            };
            if let Err(err) = self.load_shard(unloaded, cancel).await {
                return Err((err, entry));
            }
        }
        self.mark_parent_dirty().await;
        Ok(())
    }

    /// Remove and return an entry
    async fn take_entry(&self, name: &str, cancel: &CancellationToken) -> Result<Entry, MfsError> {
        let entry = loop {
            let unloaded = {
                let mut state = self.0.state.lock().await;
                match state.remove(name) {
                    Ok(Some(entry)) => break entry,
                    Ok(None) => return Err(MfsError::NotFound(name.to_string())),
                    Err(unloaded) => unloaded,
                }
            };
            self.load_shard(unloaded, cancel).await?;
        };
        self.mark_parent_dirty().await;
        Ok(entry)
    }

    /// Link an existing node under `name`. Nothing is serialized until flush.
    pub async fn add_child(
        &self,
        name: &str,
        link: NodeLink,
        cancel: &CancellationToken,
    ) -> Result<(), MfsError> {
        validate_name(name)?;
        self.insert_entry(name, Entry::from_link(&link), cancel)
            .await
            .map_err(|(err, _)| err)
    }

    /// Create a new file holding `data`
    pub async fn add_file(
        &self,
        name: &str,
        data: impl Into<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<File, MfsError> {
        validate_name(name)?;
        let data: Bytes = data.into();
        let size = data.len() as u64;
        let file = File::new(self.0.store.clone(), data, self.weak());
        let entry = Entry::resolved(FsNode::File(file.clone()), size);
        self.insert_entry(name, entry, cancel)
            .await
            .map_err(|(err, _)| err)?;
        Ok(file)
    }

    /// Create an empty sub-directory and return a live handle to it
    pub async fn mkdir(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Directory, MfsError> {
        validate_name(name)?;
        let dir = Directory::new_empty(self.0.store.clone(), self.0.config.clone(), self.weak());
        let entry = Entry::resolved(FsNode::Dir(dir.clone()), 0);
        self.insert_entry(name, entry, cancel)
            .await
            .map_err(|(err, _)| err)?;
        Ok(dir)
    }

    /// Resolve a child, loading it from the store on first access
    pub async fn child(&self, name: &str, cancel: &CancellationToken) -> Result<FsNode, MfsError> {
        let child = self.child_ref(name, cancel).await?;
        self.resolve(name, child, cancel).await
    }

    /// Resolve `name` as a directory, creating it if it does not exist.
    ///  Check and creation happen under one lock, so racing callers
    ///  end up with the same directory.
    pub(crate) async fn child_or_mkdir(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Directory, MfsError> {
        validate_name(name)?;
        let (child, created) = loop {
            let unloaded = {
                let mut state = self.0.state.lock().await;
                let existing = state.repr.get(name).map(|found| found.map(ChildRef::of));
                match existing {
                    Ok(Some(child)) => break (child, false),
                    Ok(None) => {
                        let dir = Directory::new_empty(
                            self.0.store.clone(),
                            self.0.config.clone(),
                            self.weak(),
                        );
                        let entry = Entry::resolved(FsNode::Dir(dir), 0);
                        let child = ChildRef::of(&entry);
                        match state.insert(name.to_string(), entry, &self.0.config) {
                            Ok(()) => break (child, true),
                            Err(InsertError::Exists(_)) => {
                                return Err(MfsError::AlreadyExists(name.to_string()))
                            }
                            Err(InsertError::Unloaded(unloaded, _)) => unloaded,
                        }
                    }
                    Err(unloaded) => unloaded,
                }
            };
            self.load_shard(unloaded, cancel).await?;
        };
        if created {
            self.mark_parent_dirty().await;
        }
        if child.kind == NodeKind::File {
            return Err(MfsError::NotADirectory(name.to_string()));
        }
        self.resolve(name, child, cancel).await?.into_dir(name)
    }

    /// Drop the link to `name`. Its blocks stay in the store.
    pub async fn remove_child(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), MfsError> {
        let entry = self.take_entry(name, cancel).await?;
        // a stale handle must no longer dirty us
        if let Some(node) = entry.handle() {
            node.set_parent(Weak::new());
        }
        Ok(())
    }

    /// Rename an entry within this directory
    pub async fn rename_child(
        &self,
        from: &str,
        to: &str,
        cancel: &CancellationToken,
    ) -> Result<(), MfsError> {
        validate_name(to)?;
        if from == to {
            return self.child_ref(from, cancel).await.map(|_| ());
        }
        loop {
            let unloaded = {
                let mut state = self.0.state.lock().await;
                let source = state.repr.get(from).map(|e| e.is_some());
                let target = state.repr.get(to).map(|e| e.is_some());
                match (source, target) {
                    (Err(unloaded), _) | (_, Err(unloaded)) => unloaded,
                    (Ok(false), _) => return Err(MfsError::NotFound(from.to_string())),
                    (Ok(true), Ok(true)) => return Err(MfsError::AlreadyExists(to.to_string())),
                    (Ok(true), Ok(false)) => {
                        let Ok(Some(entry)) = state.remove(from) else {
                            return Err(MfsError::NotFound(from.to_string()));
                        };
                        match state.insert(to.to_string(), entry, &self.0.config) {
                            Ok(()) => break,
                            Err(InsertError::Exists(entry))
                            | Err(InsertError::Unloaded(_, entry)) => {
                                if state.insert(from.to_string(), entry, &self.0.config).is_err() {
                                    tracing::error!(
                                        "Directory::rename_child: failed to restore {}",
                                        from
                                    );
                                }
                                return Err(MfsError::AlreadyExists(to.to_string()));
                            }
                        }
                    }
                }
            };
            self.load_shard(unloaded, cancel).await?;
        }
        self.mark_parent_dirty().await;
        Ok(())
    }

    /// Move `name` out of this directory into `target` under `new_name`.
    ///  On failure the entry is put back where it was.
    pub(crate) async fn move_child(
        &self,
        name: &str,
        target: &Directory,
        new_name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), MfsError> {
        validate_name(new_name)?;
        if self.ptr_eq(target) {
            return self.rename_child(name, new_name, cancel).await;
        }
        if target.child_ref(new_name, cancel).await.is_ok() {
            return Err(MfsError::AlreadyExists(new_name.to_string()));
        }
        let entry = self.take_entry(name, cancel).await?;
        // re-point first so writes racing the move dirty the new parent
        let handle = entry.handle().cloned();
        if let Some(node) = &handle {
            node.set_parent(target.weak());
        }
        match target.insert_entry(new_name, entry, cancel).await {
            Ok(()) => Ok(()),
            Err((err, entry)) => {
                if let Some(node) = &handle {
                    node.set_parent(self.weak());
                }
                if let Err((restore, _)) = self.insert_entry(name, entry, cancel).await {
                    tracing::error!(
                        "Directory::move_child: failed to restore {}: {}",
                        name,
                        restore
                    );
                }
                Err(err)
            }
        }
    }

    /// Names of every entry, fetching all shard blocks if sharded
    pub async fn list_names(&self, cancel: &CancellationToken) -> Result<Names, MfsError> {
        loop {
            let unloaded = {
                let state = self.0.state.lock().await;
                match state.repr.names() {
                    Ok(names) => return Ok(Names::new(names)),
                    Err(unloaded) => unloaded,
                }
            };
            self.load_shard(unloaded, cancel).await?;
        }
    }

    /// Listing of every entry with its last known identifier
    pub async fn entries(&self, cancel: &CancellationToken) -> Result<Vec<DirEntry>, MfsError> {
        loop {
            let unloaded = {
                let state = self.0.state.lock().await;
                match state.repr.entries() {
                    Ok(entries) => return Ok(entries),
                    Err(unloaded) => unloaded,
                }
            };
            self.load_shard(unloaded, cancel).await?;
        }
    }

    /// Write this directory and everything changed below it to the store.
    ///
    /// A clean directory returns its identifier without touching the store.
    ///  Otherwise children are flushed first, each under its own lock, then
    ///  this directory is encoded with their new identifiers. Mutations that
    ///  land while the flush is running keep the directory dirty. New
    ///  identifiers are only recorded once every block is stored, so a
    ///  failed or cancelled flush leaves the tree as it found it.
    pub async fn flush(&self, cancel: &CancellationToken) -> Result<Cid, MfsError> {
        let mut staged = Staged::default();
        let (cid, _) = self.prepare_flush(cancel, &mut staged).await?;
        staged.commit(cancel).await?;
        Ok(cid)
    }

    /// Store this directory and its dirty children, staging what to record.
    ///  Returns the identifier with the epoch it is current for.
    pub(crate) fn prepare_flush<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        staged: &'a mut Staged,
    ) -> BoxFuture<'a, Result<(Cid, u64), MfsError>> {
        Box::pin(async move {
            loop {
                let (epoch, resolved) = {
                    let state = self.0.state.lock().await;
                    if let (false, Some(cid)) = (state.is_dirty(), state.cid) {
                        return Ok((cid, state.flushed_epoch));
                    }
                    (state.epoch, state.repr.resolved())
                };

                let mut children = Vec::with_capacity(resolved.len());
                for (name, node) in resolved {
                    let (link, child_epoch) = node.prepare_flush(cancel, staged).await?;
                    children.push(ChildLink {
                        name,
                        node,
                        link,
                        epoch: child_epoch,
                    });
                }

                let state = self.0.state.lock().await;
                let overrides = state.overrides(&children);
                let store = self.0.store.clone();
                let stored =
                    cancellable(cancel, state.repr.store(store.as_ref(), &overrides)).await?;
                // an entry showed up mid-flush; go around again
                let Some((cid, shards)) = stored else {
                    continue;
                };
                tracing::debug!("Directory::flush: stored {}", cid);
                staged.push(Commit::Dir {
                    dir: self.clone(),
                    record: DirRecord {
                        cid,
                        epoch,
                        encoded_epoch: state.epoch,
                        children,
                        shards,
                    },
                });
                return Ok((cid, epoch));
            }
        })
    }

    /// Record a stored flush unless a newer one got there first
    pub(crate) async fn commit(&self, record: DirRecord) {
        let mut state = self.0.state.lock().await;
        if state.cid.is_some() && record.epoch <= state.flushed_epoch {
            return;
        }
        let mut current = true;
        for child in &record.children {
            current &= state.apply_child_link(child);
        }
        state.cid = Some(record.cid);
        if !current {
            // an entry moved on since; the next flush picks it up
            return;
        }
        state.flushed_epoch = record.epoch;
        if state.epoch == record.encoded_epoch {
            if let Repr::Sharded(shard) = &mut state.repr {
                shard.set_stored(record.shards);
            }
        }
    }
}
