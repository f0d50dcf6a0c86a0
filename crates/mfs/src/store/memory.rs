use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::linked_data::{compute_cid, Cid};

use super::{NodeStore, StoreError};

/// In-process block store.
///
/// Cheap to clone; all clones share the same blocks. Besides plain storage it
///  keeps a count of `put` calls and can be told to fail writes or to add
///  latency to reads, which is what the engine's tests lean on.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    blocks: RwLock<HashMap<Cid, Bytes>>,
    puts: AtomicUsize,
    fail_puts: AtomicBool,
    read_latency: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks currently held
    pub fn len(&self) -> usize {
        self.inner.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.blocks.read().is_empty()
    }

    /// Number of `put` calls served so far, including
    ///  writes of blocks that were already present
    pub fn puts(&self) -> usize {
        self.inner.puts.load(Ordering::SeqCst)
    }

    /// Make every subsequent `put` fail until reset
    pub fn set_fail_puts(&self, fail: bool) {
        self.inner.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Delay every `get` by `latency`
    pub fn set_read_latency(&self, latency: Option<Duration>) {
        *self.inner.read_latency.lock() = latency;
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn get(&self, cid: &Cid) -> Result<Bytes, StoreError> {
        let latency = *self.inner.read_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.inner
            .blocks
            .read()
            .get(cid)
            .cloned()
            .ok_or(StoreError::NotFound(*cid))
    }

    async fn put(&self, codec: u64, data: Vec<u8>) -> Result<Cid, StoreError> {
        if self.inner.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Default(anyhow!("memory store is rejecting writes")));
        }
        let cid = compute_cid(codec, &data)?;
        self.inner.puts.fetch_add(1, Ordering::SeqCst);
        self.inner
            .blocks
            .write()
            .entry(cid)
            .or_insert_with(|| Bytes::from(data));
        Ok(cid)
    }

    async fn has(&self, cid: &Cid) -> Result<bool, StoreError> {
        Ok(self.inner.blocks.read().contains_key(cid))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::linked_data::LD_RAW_CODEC;

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = MemoryStore::new();
        let a = store.put(LD_RAW_CODEC, b"block".to_vec()).await.unwrap();
        let b = store.put(LD_RAW_CODEC, b"block".to_vec()).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.puts(), 2);
        assert_eq!(store.get(&a).await.unwrap(), Bytes::from_static(b"block"));
    }

    #[tokio::test]
    async fn test_get_missing_block() {
        let store = MemoryStore::new();
        let cid = compute_cid(LD_RAW_CODEC, b"never stored").unwrap();

        assert!(matches!(store.get(&cid).await, Err(StoreError::NotFound(c)) if c == cid));
        assert!(!store.has(&cid).await.unwrap());
    }

    #[tokio::test]
    async fn test_failing_puts() {
        let store = MemoryStore::new();
        store.set_fail_puts(true);
        assert!(store.put(LD_RAW_CODEC, b"x".to_vec()).await.is_err());
        assert!(store.is_empty());

        store.set_fail_puts(false);
        assert!(store.put(LD_RAW_CODEC, b"x".to_vec()).await.is_ok());
    }
}
