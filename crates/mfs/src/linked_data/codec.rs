use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};

use super::LD_DAG_CBOR_CODEC;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode block: {0}")]
    Encode(String),
    #[error("failed to decode block: {0}")]
    Decode(String),
    #[error("multihash error: {0}")]
    Multihash(#[from] cid::multihash::Error),
    #[error("unsupported multihash code: {0:#x}")]
    UnsupportedHash(u64),
    #[error("invalid digest length: {0}")]
    InvalidDigestLength(usize),
}

/// Marker for the DAG-CBOR codec
#[derive(Debug, Clone, Copy, Default)]
pub struct DagCborCodec(PhantomData<()>);

impl DagCborCodec {
    pub const CODE: u64 = LD_DAG_CBOR_CODEC;
}

/// Types that can be written to and read from a block
///  with a given codec. Implementors just opt in:
///
/// ```ignore
/// impl BlockEncoded<DagCborCodec> for DirNode {}
/// ```
pub trait BlockEncoded<C>: Serialize + DeserializeOwned {
    fn codec(&self) -> u64 {
        DagCborCodec::CODE
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(data: &[u8]) -> Result<Self, CodecError> {
        serde_ipld_dagcbor::from_slice(data).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
