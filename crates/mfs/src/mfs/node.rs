use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::linked_data::{BlockEncoded, Cid, DagCborCodec};

/**
 * Nodes
 * =====
 * What actually lands in the store. A directory is either:
 *  - Basic: one block holding every name -> link pair
 *  - Shard: the root of a hashed tree of bucket blocks, where
 *     each bucket either holds a handful of links inline or
 *     points at a deeper shard block
 * File content is never wrapped; a file link points straight
 *  at a raw blob.
 * Links carry their kind so a parent can be listed without
 *  touching any child block.
 */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Dir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeLink {
    // raw content blob and its length in bytes
    File(Cid, u64),
    Dir(Cid),
}

impl NodeLink {
    pub fn new_file(cid: Cid, size: u64) -> Self {
        NodeLink::File(cid, size)
    }

    pub fn new_dir(cid: Cid) -> Self {
        NodeLink::Dir(cid)
    }

    pub fn cid(&self) -> &Cid {
        match self {
            NodeLink::File(cid, _) => cid,
            NodeLink::Dir(cid) => cid,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeLink::File(..) => NodeKind::File,
            NodeLink::Dir(_) => NodeKind::Dir,
        }
    }

    /// Content length for files, zero for directories
    pub fn size(&self) -> u64 {
        match self {
            NodeLink::File(_, size) => *size,
            NodeLink::Dir(_) => 0,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, NodeLink::Dir(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, NodeLink::File(..))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BasicNode {
    pub links: BTreeMap<String, NodeLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardNode {
    // 0 for the block a directory link points at
    pub depth: u32,
    pub width_bits: u8,
    // sorted by index, empty buckets omitted
    pub buckets: Vec<BucketNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketNode {
    pub index: u32,
    pub bucket: BucketLink,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BucketLink {
    Leaf(BTreeMap<String, NodeLink>),
    Shard(Cid),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DirNode {
    Basic(BasicNode),
    Shard(ShardNode),
}

impl BlockEncoded<DagCborCodec> for DirNode {}

impl Default for DirNode {
    fn default() -> Self {
        DirNode::Basic(BasicNode::default())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::linked_data::{compute_cid, LD_RAW_CODEC};

    fn file_link(data: &[u8]) -> NodeLink {
        NodeLink::new_file(compute_cid(LD_RAW_CODEC, data).unwrap(), data.len() as u64)
    }

    #[test]
    fn test_basic_node_encode_decode() {
        let mut node = BasicNode::default();
        node.links.insert("readme".to_string(), file_link(b"# hi"));
        let node = DirNode::Basic(node);

        let encoded = node.encode().unwrap();
        let decoded = DirNode::decode(&encoded).unwrap();

        assert_eq!(node, decoded);
    }

    #[test]
    fn test_shard_node_encode_decode() {
        let mut leaf = BTreeMap::new();
        leaf.insert("a".to_string(), file_link(b"a"));
        let node = DirNode::Shard(ShardNode {
            depth: 0,
            width_bits: 8,
            buckets: vec![
                BucketNode {
                    index: 3,
                    bucket: BucketLink::Leaf(leaf),
                },
                BucketNode {
                    index: 200,
                    bucket: BucketLink::Shard(compute_cid(LD_RAW_CODEC, b"sub").unwrap()),
                },
            ],
        });

        let decoded = DirNode::decode(&node.encode().unwrap()).unwrap();
        assert_eq!(node, decoded);
    }

    #[test]
    fn test_link_accessors() {
        let link = file_link(b"12345");
        assert!(link.is_file());
        assert_eq!(link.size(), 5);
        assert_eq!(link.kind(), NodeKind::File);

        let dir = NodeLink::new_dir(*link.cid());
        assert!(dir.is_dir());
        assert_eq!(dir.size(), 0);
    }
}
