//! Mutable filesystem over an immutable node store.
//!
//! Directories and files are handles over nodes that live in a
//! [`NodeStore`](crate::store::NodeStore). Edits happen in memory and mark
//! the edited node and its ancestors dirty; nothing is written until a
//! flush, which stores every dirty node bottom up and hands back the new
//! root identifier.
//!
//! Children are materialized lazily: listing or walking a directory that was
//! loaded from the store only fetches the nodes that are actually touched.
//! Large directories switch from a single inline node to a hashed shard tree
//! once they cross [`MfsConfig::shard_threshold_bytes`], transparently to
//! callers.

mod config;
mod directory;
mod entry;
mod error;
mod file;
mod node;
pub mod path;
mod republisher;
mod root;
mod shard;
mod staged;

pub use config::{ConfigError, MfsConfig, PublishConfig};
pub use directory::{Directory, Names};
pub use entry::{DirEntry, FsNode};
pub use error::MfsError;
pub use file::{store_file, File};
pub use node::{BasicNode, BucketLink, BucketNode, DirNode, NodeKind, NodeLink, ShardNode};
pub use republisher::Publisher;
pub use root::Root;
