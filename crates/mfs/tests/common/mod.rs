//! Shared test utilities for mfs integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use mfs::mfs::path;
use mfs::prelude::*;
use rand::Rng;
use tempfile::TempDir;

/// Install a tracing subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config that shards after a handful of entries
pub fn small_shard_config() -> MfsConfig {
    MfsConfig {
        shard_threshold_bytes: 1024,
        shard_width_bits: 4,
        shard_bucket_size: 4,
        ..Default::default()
    }
}

/// A new empty root over an in-memory store
pub async fn setup_memory_root(config: MfsConfig) -> (Root, MemoryStore) {
    init_tracing();
    let store = MemoryStore::new();
    let root = Root::empty(
        Arc::new(store.clone()),
        None,
        config,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    (root, store)
}

/// A new empty root over an on-disk iroh-blobs store
pub async fn setup_blobs_root(config: MfsConfig) -> (Root, BlobsStore, TempDir) {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let blobs = BlobsStore::fs(&temp_dir.path().join("blobs")).await.unwrap();
    let root = Root::empty(
        Arc::new(blobs.clone()),
        None,
        config,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    (root, blobs, temp_dir)
}

/// Reopen a flushed root from its identifier
pub async fn reopen(store: &MemoryStore, cid: Cid, config: MfsConfig) -> Root {
    Root::new(
        Arc::new(store.clone()),
        cid,
        None,
        config,
        &CancellationToken::new(),
    )
    .await
    .unwrap()
}

/// Create a file at `dir_path/name`, making parent directories as needed
pub async fn write_file(dir: &Directory, dir_path: &str, name: &str, data: &[u8]) -> File {
    let cancel = CancellationToken::new();
    let parent = path::mkdir_p(dir, dir_path, &cancel).await.unwrap();
    parent
        .add_file(name, Bytes::copy_from_slice(data), &cancel)
        .await
        .unwrap()
}

/// Read the file at `file_path` back
pub async fn read_file(dir: &Directory, file_path: &str) -> Bytes {
    let cancel = CancellationToken::new();
    let node = path::lookup(dir, file_path, &cancel).await.unwrap();
    node.into_file(file_path)
        .unwrap()
        .content(&cancel)
        .await
        .unwrap()
}

pub async fn names(dir: &Directory) -> Vec<String> {
    dir.list_names(&CancellationToken::new())
        .await
        .unwrap()
        .collect()
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    data
}

/// Publisher that records what it was given and can be told to fail
#[derive(Default)]
pub struct RecordingPublisher {
    published: parking_lot::Mutex<Vec<Cid>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published(&self) -> Vec<Cid> {
        self.published.lock().clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, cid: Cid) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("publisher offline");
        }
        self.published.lock().push(cid);
        Ok(())
    }
}
