/**
 * Content identifiers and block encoding.
 * Thin wrapper around `cid` and DAG-CBOR so the
 *  rest of the crate never touches multihash
 *  codes directly.
 */
pub mod linked_data;
/**
 * The mutable filesystem engine.
 *  - Root / Directory / File handles
 *  - Inline and sharded directory representations
 *  - mkdir -p style path navigation
 *  - Debounced publishing of new root identifiers
 */
pub mod mfs;
/**
 * Node store adapters.
 *  The engine only ever talks to a `NodeStore`;
 *  we ship an in-memory store and an iroh-blobs
 *  backed store.
 */
pub mod store;

pub mod prelude {
    pub use crate::linked_data::{Cid, CodecError};
    pub use crate::mfs::{
        store_file, DirEntry, Directory, File, FsNode, MfsConfig, MfsError, Names, NodeKind,
        NodeLink, PublishConfig, Publisher, Root,
    };
    pub use crate::store::{BlobsStore, MemoryStore, NodeStore, StoreError};
    pub use tokio_util::sync::CancellationToken;
}
