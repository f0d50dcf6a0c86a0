//! Integration tests for flush: idempotence, determinism and failure handling

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use mfs::mfs::path;
use mfs::prelude::*;

/// Memory store that fires a cancellation token after a set number of puts
#[derive(Debug, Default)]
struct CancellingStore {
    inner: MemoryStore,
    armed: parking_lot::Mutex<Option<(usize, CancellationToken)>>,
}

impl CancellingStore {
    fn arm(&self, puts: usize, cancel: &CancellationToken) {
        *self.armed.lock() = Some((puts, cancel.clone()));
    }
}

#[async_trait]
impl NodeStore for CancellingStore {
    async fn get(&self, cid: &Cid) -> Result<Bytes, StoreError> {
        self.inner.get(cid).await
    }

    async fn put(&self, codec: u64, data: Vec<u8>) -> Result<Cid, StoreError> {
        let cid = self.inner.put(codec, data).await?;
        let mut armed = self.armed.lock();
        if let Some((remaining, cancel)) = armed.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                cancel.cancel();
                *armed = None;
            }
        }
        Ok(cid)
    }

    async fn has(&self, cid: &Cid) -> Result<bool, StoreError> {
        self.inner.has(cid).await
    }
}

async fn setup_cancelling_root(config: MfsConfig) -> (Root, Arc<CancellingStore>) {
    common::init_tracing();
    let store = Arc::new(CancellingStore::default());
    let root = Root::empty(store.clone(), None, config, &CancellationToken::new())
        .await
        .unwrap();
    (root, store)
}

#[tokio::test]
async fn test_clean_flush_writes_nothing() {
    let (root, store) = common::setup_memory_root(MfsConfig::default()).await;
    let cancel = CancellationToken::new();

    common::write_file(root.directory(), "a/b", "file", b"data").await;
    let cid = root.flush(&cancel).await.unwrap();
    assert!(!root.directory().is_dirty().await);

    let puts = store.puts();
    for _ in 0..3 {
        assert_eq!(root.flush(&cancel).await.unwrap(), cid);
    }
    assert_eq!(store.puts(), puts);
}

#[tokio::test]
async fn test_flush_is_order_independent() {
    let files = [("a", "x"), ("a/b", "y"), ("c", "z"), ("", "top")];
    let cancel = CancellationToken::new();

    let (forward, _) = common::setup_memory_root(MfsConfig::default()).await;
    for (dir, name) in files {
        common::write_file(forward.directory(), dir, name, name.as_bytes()).await;
    }
    let (backward, _) = common::setup_memory_root(MfsConfig::default()).await;
    for (dir, name) in files.iter().rev() {
        common::write_file(backward.directory(), dir, name, name.as_bytes()).await;
    }

    assert_eq!(
        forward.flush(&cancel).await.unwrap(),
        backward.flush(&cancel).await.unwrap()
    );
}

#[tokio::test]
async fn test_flushing_in_steps_matches_one_flush() {
    let cancel = CancellationToken::new();

    let (stepped, _) = common::setup_memory_root(MfsConfig::default()).await;
    common::write_file(stepped.directory(), "a", "one", b"1").await;
    stepped.flush(&cancel).await.unwrap();
    common::write_file(stepped.directory(), "a/b", "two", b"2").await;
    let stepped_cid = stepped.flush(&cancel).await.unwrap();

    let (at_once, _) = common::setup_memory_root(MfsConfig::default()).await;
    common::write_file(at_once.directory(), "a", "one", b"1").await;
    common::write_file(at_once.directory(), "a/b", "two", b"2").await;

    assert_eq!(at_once.flush(&cancel).await.unwrap(), stepped_cid);
}

#[tokio::test]
async fn test_file_change_dirties_ancestors() {
    let (root, store) = common::setup_memory_root(MfsConfig::default()).await;
    let cancel = CancellationToken::new();
    let top = root.directory();

    let file = common::write_file(top, "a/b", "file", b"v1").await;
    let first = root.flush(&cancel).await.unwrap();
    let a = path::lookup_dir(top, "a", &cancel).await.unwrap();
    let b = path::lookup_dir(top, "a/b", &cancel).await.unwrap();
    assert!(!a.is_dirty().await && !b.is_dirty().await);

    file.set_content(&b"v2"[..]).await;
    assert!(file.is_dirty().await);
    assert!(b.is_dirty().await);
    assert!(a.is_dirty().await);
    assert!(top.is_dirty().await);

    let second = root.flush(&cancel).await.unwrap();
    assert_ne!(first, second);

    let reopened = common::reopen(&store, second, MfsConfig::default()).await;
    assert_eq!(&common::read_file(reopened.directory(), "a/b/file").await[..], b"v2");
    let old = common::reopen(&store, first, MfsConfig::default()).await;
    assert_eq!(&common::read_file(old.directory(), "a/b/file").await[..], b"v1");
}

#[tokio::test]
async fn test_failed_flush_keeps_everything_dirty() {
    let (root, store) = common::setup_memory_root(MfsConfig::default()).await;
    let cancel = CancellationToken::new();
    let initial = root.last_published().await;

    common::write_file(root.directory(), "a", "file", b"data").await;
    store.set_fail_puts(true);

    let result = root.flush(&cancel).await;
    assert!(matches!(result, Err(MfsError::Store { .. })));
    assert!(root.directory().is_dirty().await);
    assert_eq!(root.last_published().await, initial);

    store.set_fail_puts(false);
    let cid = root.flush(&cancel).await.unwrap();
    assert_eq!(root.last_published().await, Some(cid));
    assert!(!root.directory().is_dirty().await);
}

#[tokio::test]
async fn test_cancelled_flush_changes_nothing() {
    let (root, store) = common::setup_memory_root(MfsConfig::default()).await;
    common::write_file(root.directory(), "a/b", "file", b"data").await;
    let blocks = store.len();

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(root.flush(&cancel).await, Err(MfsError::Cancelled)));
    assert!(root.directory().is_dirty().await);
    assert_eq!(store.len(), blocks);

    let cid = root.flush(&CancellationToken::new()).await.unwrap();
    assert_eq!(root.directory().cid().await, Some(cid));
}

#[tokio::test]
async fn test_flush_cancelled_midway_records_nothing() {
    let (root, store) = setup_cancelling_root(MfsConfig::default()).await;
    let top = root.directory();
    let file = common::write_file(top, "a", "f", b"data").await;
    let a = path::lookup_dir(top, "a", &CancellationToken::new())
        .await
        .unwrap();
    let top_before = top.cid().await;
    let published_before = root.last_published().await;

    // the file block goes in, then the token fires before `a` is stored
    let cancel = CancellationToken::new();
    store.arm(1, &cancel);
    assert!(matches!(root.flush(&cancel).await, Err(MfsError::Cancelled)));
    assert!(file.is_dirty().await);
    assert_eq!(file.cid().await, None);
    assert!(a.is_dirty().await);
    assert_eq!(a.cid().await, None);
    assert_eq!(top.cid().await, top_before);
    assert_eq!(root.last_published().await, published_before);

    let cancel = CancellationToken::new();
    let first = root.flush(&cancel).await.unwrap();
    assert!(!file.is_dirty().await && !a.is_dirty().await);

    // same again over a tree that was flushed before
    file.set_content(&b"changed"[..]).await;
    let file_before = file.cid().await;
    let cancel = CancellationToken::new();
    store.arm(1, &cancel);
    assert!(matches!(root.flush(&cancel).await, Err(MfsError::Cancelled)));
    assert_eq!(file.cid().await, file_before);
    assert!(file.is_dirty().await && a.is_dirty().await && top.is_dirty().await);
    assert_eq!(top.cid().await, Some(first));

    let second = root.flush(&CancellationToken::new()).await.unwrap();
    assert_ne!(second, first);
    assert!(!top.is_dirty().await);
    assert_eq!(&common::read_file(top, "a/f").await[..], b"changed");
}

#[tokio::test]
async fn test_cancelled_sharded_flush_then_retry_matches_fresh_build() {
    let config = common::small_shard_config();
    let (root, store) = setup_cancelling_root(config.clone()).await;
    let cancel = CancellationToken::new();
    let big = root.directory().mkdir("big", &cancel).await.unwrap();
    let mut files = Vec::new();
    for i in 0..60 {
        let file = big
            .add_file(&format!("entry-{i}"), format!("{i}").into_bytes(), &cancel)
            .await
            .unwrap();
        files.push(file);
    }
    assert!(big.is_sharded().await);
    root.flush(&cancel).await.unwrap();

    files[7].set_content(&b"seven"[..]).await;
    files[42].set_content(&b"forty two"[..]).await;
    // both files and one shard block go in before the token fires
    let cancelled = CancellationToken::new();
    store.arm(3, &cancelled);
    assert!(matches!(root.flush(&cancelled).await, Err(MfsError::Cancelled)));
    assert!(big.is_dirty().await);
    let retried = root.flush(&cancel).await.unwrap();

    let (fresh, _) = common::setup_memory_root(config).await;
    let fresh_big = fresh.directory().mkdir("big", &cancel).await.unwrap();
    for i in 0..60 {
        let data = match i {
            7 => b"seven".to_vec(),
            42 => b"forty two".to_vec(),
            _ => format!("{i}").into_bytes(),
        };
        fresh_big
            .add_file(&format!("entry-{i}"), data, &cancel)
            .await
            .unwrap();
    }
    assert_eq!(fresh.flush(&cancel).await.unwrap(), retried);
}

#[tokio::test]
async fn test_flush_path_only_flushes_subtree() {
    let (root, store) = common::setup_memory_root(MfsConfig::default()).await;
    let cancel = CancellationToken::new();
    let top = root.directory();

    common::write_file(top, "a/b", "inner", b"inner").await;
    common::write_file(top, "c", "outer", b"outer").await;

    let b_cid = path::flush_path(top, "a/b", &cancel).await.unwrap();
    let b = path::lookup_dir(top, "a/b", &cancel).await.unwrap();
    assert!(!b.is_dirty().await);
    assert!(top.is_dirty().await);
    assert!(path::lookup_dir(top, "c", &cancel)
        .await
        .unwrap()
        .is_dirty()
        .await);

    // the flushed subtree is complete on its own
    let sub = Root::new(
        std::sync::Arc::new(store.clone()),
        b_cid,
        None,
        MfsConfig::default(),
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(&common::read_file(sub.directory(), "inner").await[..], b"inner");

    let file_cid = path::flush_path(top, "c/outer", &cancel).await.unwrap();
    assert_eq!(&store.get(&file_cid).await.unwrap()[..], b"outer");
}
