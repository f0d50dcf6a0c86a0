//! Node store adapters
//!
//! The engine's only external dependency is a content-addressed block store:
//! put some bytes, get back a deterministic identifier; hand back the
//! identifier, get the bytes. Everything else (persistence, deduplication,
//! garbage collection) is the store's business.

mod blobs;
mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

use crate::linked_data::{BlockEncoded, Cid, CodecError, DagCborCodec};

pub use blobs::BlobsStore;
pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("block not found: {0}")]
    NotFound(Cid),
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("export bao error: {0}")]
    ExportBao(#[from] iroh_blobs::api::ExportBaoError),
    #[error("request error: {0}")]
    Request(#[from] iroh_blobs::api::RequestError),
}

/// Content-addressed get / put of serialized nodes
#[async_trait]
pub trait NodeStore: Debug + Send + Sync {
    /// Fetch the block behind `cid`.
    ///  Returns [`StoreError::NotFound`] for a dangling identifier.
    async fn get(&self, cid: &Cid) -> Result<Bytes, StoreError>;

    /// Store `data` and return its identifier. Storing identical bytes
    ///  under the same codec must return the same identifier.
    async fn put(&self, codec: u64, data: Vec<u8>) -> Result<Cid, StoreError>;

    /// Check whether a block is present
    async fn has(&self, cid: &Cid) -> Result<bool, StoreError>;
}

/// Fetch and decode a DAG-CBOR block
pub async fn get_block<T: BlockEncoded<DagCborCodec>>(
    store: &dyn NodeStore,
    cid: &Cid,
) -> Result<T, StoreError> {
    let data = store.get(cid).await?;
    Ok(T::decode(&data)?)
}

/// Encode and store a DAG-CBOR block
pub async fn put_block<T: BlockEncoded<DagCborCodec>>(
    store: &dyn NodeStore,
    block: &T,
) -> Result<Cid, StoreError> {
    let data = block.encode()?;
    store.put(block.codec(), data).await
}
