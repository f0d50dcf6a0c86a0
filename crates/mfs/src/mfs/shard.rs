//! Hashed, fixed fan-out bucket tree for large directories.
//!
//! A name lands in bucket `bits(blake3(name), depth)` of the shard at each
//! level. Buckets hold up to `bucket_size` entries inline; one more and the
//! bucket is pushed down into a child shard one level deeper. Removing
//! entries pulls a child shard back into a single bucket once it only holds
//! inline buckets that fit. Together these keep the layout a pure function of
//! the entry set, so identical directories encode to identical blocks no
//! matter the order they were built in.
//!
//! Child shards loaded from the store start out as [`ShardSlot::Stored`].
//! Walks that hit one stop with [`Unloaded`] so the caller can fetch the block
//! without holding the directory lock, install it and retry.

use std::collections::BTreeMap;

use futures::future::BoxFuture;

use crate::linked_data::Cid;
use crate::store::{put_block, NodeStore};

use super::entry::{DirEntry, Entry, FsNode};
use super::error::MfsError;
use super::node::{BucketLink, BucketNode, DirNode, NodeLink, ShardNode};

pub(crate) type NameHash = [u8; 32];

pub(crate) fn hash_name(name: &str) -> NameHash {
    *blake3::hash(name.as_bytes()).as_bytes()
}

/// Read `width_bits` bits of `hash` starting at bit `depth * width_bits`
pub(crate) fn bucket_index(hash: &NameHash, depth: u32, width_bits: u8) -> u32 {
    let width = width_bits as usize;
    let start = depth as usize * width;
    (start..start + width).fold(0u32, |index, bit| {
        let set = (hash[bit / 8] >> (7 - bit % 8)) & 1;
        (index << 1) | set as u32
    })
}

/// Deepest level that still has unread hash bits
fn max_depth(width_bits: u8) -> u32 {
    (256 / width_bits as u32) - 1
}

const MAX_WIDTH_BITS: u8 = 8;

/// Links a flush wants recorded in place of what entries hold now
pub(crate) type LinkOverrides = BTreeMap<String, NodeLink>;

/// Identifiers of shard blocks stored by a flush, by bucket path
pub(crate) type StoredShards = Vec<(Vec<u32>, Cid)>;

/// A walk ran into a child shard that has not been fetched yet
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Unloaded {
    pub(crate) path: Vec<u32>,
    pub(crate) cid: Cid,
}

#[derive(Debug)]
pub(crate) enum InsertError {
    Exists(Entry),
    Unloaded(Unloaded, Entry),
}

#[derive(Debug)]
pub(crate) enum ShardSlot {
    Stored(Cid),
    Loaded(Box<Shard>),
}

#[derive(Debug)]
pub(crate) enum Bucket {
    Leaf(BTreeMap<String, Entry>),
    Child(ShardSlot),
}

#[derive(Debug)]
pub(crate) struct Shard {
    depth: u32,
    width_bits: u8,
    bucket_size: usize,
    // identifier of this shard block; cleared by any change below it
    cid: Option<Cid>,
    buckets: BTreeMap<u32, Bucket>,
}

impl Shard {
    /// Lay out `entries` as a fresh shard at `depth`
    pub(crate) fn from_entries(
        entries: impl IntoIterator<Item = (String, Entry)>,
        depth: u32,
        width_bits: u8,
        bucket_size: usize,
    ) -> Self {
        let mut groups: BTreeMap<u32, BTreeMap<String, Entry>> = BTreeMap::new();
        for (name, entry) in entries {
            let index = bucket_index(&hash_name(&name), depth, width_bits);
            groups.entry(index).or_default().insert(name, entry);
        }

        let buckets = groups
            .into_iter()
            .map(|(index, group)| {
                let bucket = if group.len() > bucket_size && depth < max_depth(width_bits) {
                    let child = Shard::from_entries(group, depth + 1, width_bits, bucket_size);
                    Bucket::Child(ShardSlot::Loaded(Box::new(child)))
                } else {
                    Bucket::Leaf(group)
                };
                (index, bucket)
            })
            .collect();

        Self {
            depth,
            width_bits,
            bucket_size,
            cid: None,
            buckets,
        }
    }

    /// Rebuild a shard from its stored block, expected at `depth`.
    ///  Child shards stay in the store until something walks into them.
    pub(crate) fn from_node(
        node: ShardNode,
        cid: Cid,
        depth: u32,
        bucket_size: usize,
    ) -> Result<Self, MfsError> {
        let invalid = |reason: String| MfsError::InvalidShard { cid, reason };
        if node.width_bits == 0 || node.width_bits > MAX_WIDTH_BITS {
            return Err(invalid(format!("width {} out of range", node.width_bits)));
        }
        if node.depth != depth || depth > max_depth(node.width_bits) {
            return Err(invalid(format!(
                "depth {} found where depth {} belongs",
                node.depth, depth
            )));
        }

        let fanout = 1u32 << node.width_bits;
        let mut buckets = BTreeMap::new();
        for BucketNode { index, bucket } in node.buckets {
            if index >= fanout {
                return Err(invalid(format!("bucket {index} out of range")));
            }
            let bucket = match bucket {
                BucketLink::Leaf(links) => Bucket::Leaf(
                    links
                        .into_iter()
                        .map(|(name, link)| (name, Entry::from_link(&link)))
                        .collect(),
                ),
                BucketLink::Shard(cid) => Bucket::Child(ShardSlot::Stored(cid)),
            };
            if buckets.insert(index, bucket).is_some() {
                return Err(invalid(format!("bucket {index} listed twice")));
            }
        }

        Ok(Self {
            depth,
            width_bits: node.width_bits,
            bucket_size,
            cid: Some(cid),
            buckets,
        })
    }

    pub(crate) fn width_bits(&self) -> u8 {
        self.width_bits
    }

    fn index_of(&self, hash: &NameHash) -> u32 {
        bucket_index(hash, self.depth, self.width_bits)
    }

    fn unloaded(path: &mut Vec<u32>, index: u32, cid: Cid) -> Unloaded {
        path.push(index);
        Unloaded {
            path: path.clone(),
            cid,
        }
    }

    pub(crate) fn get(
        &self,
        name: &str,
        hash: &NameHash,
        path: &mut Vec<u32>,
    ) -> Result<Option<&Entry>, Unloaded> {
        let index = self.index_of(hash);
        match self.buckets.get(&index) {
            None => Ok(None),
            Some(Bucket::Leaf(entries)) => Ok(entries.get(name)),
            Some(Bucket::Child(ShardSlot::Stored(cid))) => Err(Self::unloaded(path, index, *cid)),
            Some(Bucket::Child(ShardSlot::Loaded(child))) => {
                path.push(index);
                child.get(name, hash, path)
            }
        }
    }

    /// Like `get`, but assumes the caller is about to change the entry
    ///  and invalidates every shard on the way down
    pub(crate) fn get_mut(
        &mut self,
        name: &str,
        hash: &NameHash,
        path: &mut Vec<u32>,
    ) -> Result<Option<&mut Entry>, Unloaded> {
        let index = self.index_of(hash);
        let found = match self.buckets.get_mut(&index) {
            None => None,
            Some(Bucket::Leaf(entries)) => entries.get_mut(name),
            Some(Bucket::Child(ShardSlot::Stored(cid))) => {
                return Err(Self::unloaded(path, index, *cid))
            }
            Some(Bucket::Child(ShardSlot::Loaded(child))) => {
                path.push(index);
                child.get_mut(name, hash, path)?
            }
        };
        if found.is_some() {
            self.cid = None;
        }
        Ok(found)
    }

    pub(crate) fn insert(
        &mut self,
        name: String,
        hash: &NameHash,
        entry: Entry,
        path: &mut Vec<u32>,
    ) -> Result<(), InsertError> {
        let index = self.index_of(hash);
        let can_split = self.depth < max_depth(self.width_bits);
        match self.buckets.get_mut(&index) {
            None => {
                let mut entries = BTreeMap::new();
                entries.insert(name, entry);
                self.buckets.insert(index, Bucket::Leaf(entries));
            }
            Some(Bucket::Leaf(entries)) => {
                if entries.contains_key(&name) {
                    return Err(InsertError::Exists(entry));
                }
                entries.insert(name, entry);
                if entries.len() > self.bucket_size && can_split {
                    let group = std::mem::take(entries);
                    let child = Shard::from_entries(
                        group,
                        self.depth + 1,
                        self.width_bits,
                        self.bucket_size,
                    );
                    self.buckets
                        .insert(index, Bucket::Child(ShardSlot::Loaded(Box::new(child))));
                }
            }
            Some(Bucket::Child(ShardSlot::Stored(cid))) => {
                let unloaded = Self::unloaded(path, index, *cid);
                return Err(InsertError::Unloaded(unloaded, entry));
            }
            Some(Bucket::Child(ShardSlot::Loaded(child))) => {
                path.push(index);
                child.insert(name, hash, entry, path)?;
            }
        }
        self.cid = None;
        Ok(())
    }

    pub(crate) fn remove(
        &mut self,
        name: &str,
        hash: &NameHash,
        path: &mut Vec<u32>,
    ) -> Result<Option<Entry>, Unloaded> {
        let index = self.index_of(hash);
        let removed = match self.buckets.get_mut(&index) {
            None => None,
            Some(Bucket::Leaf(entries)) => {
                let removed = entries.remove(name);
                if entries.is_empty() {
                    self.buckets.remove(&index);
                }
                removed
            }
            Some(Bucket::Child(ShardSlot::Stored(cid))) => {
                return Err(Self::unloaded(path, index, *cid))
            }
            Some(Bucket::Child(ShardSlot::Loaded(child))) => {
                path.push(index);
                let removed = child.remove(name, hash, path)?;
                if removed.is_some() {
                    if let Some(group) = child.collapse() {
                        if group.is_empty() {
                            self.buckets.remove(&index);
                        } else {
                            self.buckets.insert(index, Bucket::Leaf(group));
                        }
                    }
                }
                removed
            }
        };
        if removed.is_some() {
            self.cid = None;
        }
        Ok(removed)
    }

    /// Drain this shard into a single bucket if it has no child shards
    ///  and its entries fit
    fn collapse(&mut self) -> Option<BTreeMap<String, Entry>> {
        let mut total = 0;
        for bucket in self.buckets.values() {
            match bucket {
                Bucket::Leaf(entries) => total += entries.len(),
                Bucket::Child(_) => return None,
            }
        }
        if total > self.bucket_size {
            return None;
        }
        let mut group = BTreeMap::new();
        for (_, bucket) in std::mem::take(&mut self.buckets) {
            if let Bucket::Leaf(entries) = bucket {
                group.extend(entries);
            }
        }
        Some(group)
    }

    /// Swap a fetched child shard in for its stored placeholder.
    ///  A no-op if the placeholder changed in the meantime.
    pub(crate) fn install(&mut self, path: &[u32], cid: &Cid, shard: Shard) -> bool {
        let Some((index, rest)) = path.split_first() else {
            return false;
        };
        let Some(Bucket::Child(slot)) = self.buckets.get_mut(index) else {
            return false;
        };
        if rest.is_empty() {
            if !matches!(slot, ShardSlot::Stored(stored) if *stored == *cid) {
                return false;
            }
            *slot = ShardSlot::Loaded(Box::new(shard));
            true
        } else if let ShardSlot::Loaded(child) = slot {
            child.install(rest, cid, shard)
        } else {
            false
        }
    }

    /// Resolved child handles in loaded buckets
    pub(crate) fn resolved(&self, out: &mut Vec<(String, FsNode)>) {
        for bucket in self.buckets.values() {
            match bucket {
                Bucket::Leaf(entries) => {
                    out.extend(entries.iter().filter_map(|(name, entry)| {
                        entry.handle().map(|node| (name.clone(), node.clone()))
                    }));
                }
                Bucket::Child(ShardSlot::Loaded(child)) => child.resolved(out),
                Bucket::Child(ShardSlot::Stored(_)) => {}
            }
        }
    }

    /// Visit every entry in bucket order, stopping at the first
    ///  child shard that still needs fetching
    pub(crate) fn for_each<F>(&self, f: &mut F, path: &mut Vec<u32>) -> Result<(), Unloaded>
    where
        F: FnMut(&str, &Entry),
    {
        for (index, bucket) in &self.buckets {
            match bucket {
                Bucket::Leaf(entries) => {
                    for (name, entry) in entries {
                        f(name.as_str(), entry);
                    }
                }
                Bucket::Child(ShardSlot::Stored(cid)) => {
                    return Err(Self::unloaded(path, *index, *cid))
                }
                Bucket::Child(ShardSlot::Loaded(child)) => {
                    path.push(*index);
                    child.for_each(f, path)?;
                    path.pop();
                }
            }
        }
        Ok(())
    }

    pub(crate) fn names(&self) -> Result<Vec<String>, Unloaded> {
        let mut names = Vec::new();
        self.for_each(
            &mut |name: &str, _: &Entry| names.push(name.to_string()),
            &mut Vec::new(),
        )?;
        Ok(names)
    }

    pub(crate) fn entries(&self) -> Result<Vec<DirEntry>, Unloaded> {
        let mut listing = Vec::new();
        self.for_each(
            &mut |name: &str, entry: &Entry| listing.push(entry.listing(name)),
            &mut Vec::new(),
        )?;
        Ok(listing)
    }

    /// Record identifiers stored by a flush that is now complete
    pub(crate) fn set_stored(&mut self, stored: StoredShards) {
        for (path, cid) in stored {
            self.set_cid_at(&path, cid);
        }
    }

    fn set_cid_at(&mut self, path: &[u32], cid: Cid) {
        let Some((index, rest)) = path.split_first() else {
            self.cid = Some(cid);
            return;
        };
        if let Some(Bucket::Child(ShardSlot::Loaded(child))) = self.buckets.get_mut(index) {
            child.set_cid_at(rest, cid);
        }
    }

    /// Store every changed shard block, deepest first, and return the
    ///  identifier of this one. Entry links are read through `overrides`;
    ///  `touched` holds the name hashes of overridden entries under this
    ///  shard. Nothing in memory changes: new block identifiers are pushed
    ///  onto `stored`. `Ok(None)` means some entry has no identifier yet and
    ///  the caller must flush children first.
    pub(crate) fn store<'a>(
        &'a self,
        store: &'a dyn NodeStore,
        overrides: &'a LinkOverrides,
        touched: Vec<NameHash>,
        path: Vec<u32>,
        stored: &'a mut StoredShards,
    ) -> BoxFuture<'a, Result<Option<Cid>, MfsError>> {
        Box::pin(async move {
            if let (Some(cid), true) = (self.cid, touched.is_empty()) {
                return Ok(Some(cid));
            }

            let mut touched_by_bucket: BTreeMap<u32, Vec<NameHash>> = BTreeMap::new();
            for hash in touched {
                touched_by_bucket
                    .entry(self.index_of(&hash))
                    .or_default()
                    .push(hash);
            }

            let mut buckets = Vec::with_capacity(self.buckets.len());
            for (index, bucket) in &self.buckets {
                let link = match bucket {
                    Bucket::Leaf(entries) => {
                        let mut links = BTreeMap::new();
                        for (name, entry) in entries {
                            let link = overrides.get(name).copied().or_else(|| entry.link());
                            let Some(link) = link else {
                                return Ok(None);
                            };
                            links.insert(name.clone(), link);
                        }
                        BucketLink::Leaf(links)
                    }
                    Bucket::Child(ShardSlot::Stored(cid)) => BucketLink::Shard(*cid),
                    Bucket::Child(ShardSlot::Loaded(child)) => {
                        let touched = touched_by_bucket.remove(index).unwrap_or_default();
                        let mut child_path = path.clone();
                        child_path.push(*index);
                        match child
                            .store(store, overrides, touched, child_path, &mut *stored)
                            .await?
                        {
                            Some(cid) => BucketLink::Shard(cid),
                            None => return Ok(None),
                        }
                    }
                };
                buckets.push(BucketNode {
                    index: *index,
                    bucket: link,
                });
            }

            let node = DirNode::Shard(ShardNode {
                depth: self.depth,
                width_bits: self.width_bits,
                buckets,
            });
            let cid = put_block(store, &node)
                .await
                .map_err(|e| MfsError::store("storing shard", e))?;
            tracing::debug!("Shard::store: depth {} stored as {}", self.depth, cid);
            stored.push((path, cid));
            Ok(Some(cid))
        })
    }
}
