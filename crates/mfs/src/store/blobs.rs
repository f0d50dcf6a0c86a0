use std::future::IntoFuture;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use iroh_blobs::{
    api::blobs::{BlobStatus, Blobs},
    store::{fs::FsStore, mem::MemStore},
    BlobsProtocol, Hash,
};

use crate::linked_data::{blake3_digest, cid_from_digest, Cid};

use super::{NodeStore, StoreError};

/// Node store over a local iroh-blob store.
///
/// iroh-blobs addresses everything by BLAKE3, so a node's CID is just the blob
///  hash wrapped with the codec of the node. The codec is not stored with the
///  blob; it only lives in the CID.
#[derive(Clone, Debug)]
pub struct BlobsStore {
    pub inner: Arc<BlobsProtocol>,
}

impl Deref for BlobsStore {
    type Target = Arc<BlobsProtocol>;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl BlobsStore {
    /// Load a blob store from the given path on disk
    pub async fn fs(path: &Path) -> Result<Self, StoreError> {
        tracing::debug!("BlobsStore::fs called with path: {:?}", path);
        let store = FsStore::load(path).await?;
        let blobs = BlobsProtocol::new(&store, None);
        Ok(Self {
            inner: Arc::new(blobs),
        })
    }

    /// Load a memory blobs store
    pub async fn memory() -> Result<Self, StoreError> {
        let store = MemStore::new();
        let blobs = BlobsProtocol::new(&store, None);
        Ok(Self {
            inner: Arc::new(blobs),
        })
    }

    /// Get a handle to the underlying blobs client against
    ///  the store
    pub fn blobs(&self) -> &Blobs {
        self.inner.store().blobs()
    }

    fn blob_hash(cid: &Cid) -> Result<Hash, StoreError> {
        let digest = blake3_digest(cid)?;
        Ok(Hash::from_bytes(digest))
    }

    async fn stat(&self, hash: Hash) -> Result<bool, StoreError> {
        let stat = self
            .blobs()
            .status(hash)
            .await
            .map_err(|err| StoreError::Default(anyhow!(err)))?;
        Ok(matches!(stat, BlobStatus::Complete { .. }))
    }
}

#[async_trait]
impl NodeStore for BlobsStore {
    async fn get(&self, cid: &Cid) -> Result<Bytes, StoreError> {
        let hash = Self::blob_hash(cid)?;
        if !self.stat(hash).await? {
            tracing::debug!("BlobsStore::get: blob {} not found", hash);
            return Err(StoreError::NotFound(*cid));
        }
        let bytes = self.blobs().get_bytes(hash).await?;
        Ok(bytes)
    }

    async fn put(&self, codec: u64, data: Vec<u8>) -> Result<Cid, StoreError> {
        let hash = self.blobs().add_bytes(data).into_future().await?.hash;
        let cid = cid_from_digest(codec, hash.as_bytes())?;
        Ok(cid)
    }

    async fn has(&self, cid: &Cid) -> Result<bool, StoreError> {
        let hash = Self::blob_hash(cid)?;
        self.stat(hash).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::linked_data::{compute_cid, LD_DAG_CBOR_CODEC, LD_RAW_CODEC};

    #[tokio::test]
    async fn test_cid_matches_local_hash() {
        let store = BlobsStore::memory().await.unwrap();
        let data = b"a directory node, probably".to_vec();

        let cid = store.put(LD_DAG_CBOR_CODEC, data.clone()).await.unwrap();

        assert_eq!(cid, compute_cid(LD_DAG_CBOR_CODEC, &data).unwrap());
        assert!(store.has(&cid).await.unwrap());
        assert_eq!(store.get(&cid).await.unwrap(), Bytes::from(data));
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let store = BlobsStore::memory().await.unwrap();
        let cid = compute_cid(LD_RAW_CODEC, b"missing").unwrap();

        assert!(!store.has(&cid).await.unwrap());
        assert!(matches!(store.get(&cid).await, Err(StoreError::NotFound(_))));
    }
}
