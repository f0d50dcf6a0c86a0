//! Linked data primitives
//!
//! Every block the engine writes is addressed by a CIDv1 whose multihash is the
//! BLAKE3 digest of the block bytes. Two codecs are in use:
//!
//! - **DAG-CBOR** (`0x71`) for directory and shard nodes
//! - **Raw** (`0x55`) for file content blobs
//!
//! Keeping the digest BLAKE3 means a CID maps one-to-one onto an iroh-blobs
//! [`Hash`](iroh_blobs::Hash), so the blobs-backed store never has to keep a
//! side table.

mod codec;

pub use cid::multihash::Multihash;
pub use cid::Cid;
pub use codec::{BlockEncoded, CodecError, DagCborCodec};

/// Raw binary codec, used for file content
pub const LD_RAW_CODEC: u64 = 0x55;
/// DAG-CBOR codec, used for directory nodes
pub const LD_DAG_CBOR_CODEC: u64 = 0x71;
/// Multihash code for BLAKE3-256
pub const BLAKE3_HASH_CODE: u64 = 0x1e;

/// Build a CIDv1 around an already computed BLAKE3 digest
pub fn cid_from_digest(codec: u64, digest: &[u8; 32]) -> Result<Cid, CodecError> {
    let hash = Multihash::<64>::wrap(BLAKE3_HASH_CODE, digest)?;
    Ok(Cid::new_v1(codec, hash))
}

/// Hash `data` and build its CIDv1
pub fn compute_cid(codec: u64, data: &[u8]) -> Result<Cid, CodecError> {
    let digest = blake3::hash(data);
    cid_from_digest(codec, digest.as_bytes())
}

/// Pull the BLAKE3 digest back out of a CID.
///  Fails if the CID was built with a different hash function.
pub fn blake3_digest(cid: &Cid) -> Result<[u8; 32], CodecError> {
    let hash = cid.hash();
    if hash.code() != BLAKE3_HASH_CODE {
        return Err(CodecError::UnsupportedHash(hash.code()));
    }
    hash.digest()
        .try_into()
        .map_err(|_| CodecError::InvalidDigestLength(hash.digest().len()))
}
