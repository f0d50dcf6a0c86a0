//! Slash separated path helpers on top of [`Directory`].
//!
//! Paths are relative to the directory they are applied to. Empty segments
//! and `.` are skipped, so `""`, `"/"` and `"./"` all name the directory
//! itself. `..` is rejected as an invalid name.

use tokio_util::sync::CancellationToken;

use crate::linked_data::Cid;

use super::directory::{validate_name, Directory};
use super::entry::FsNode;
use super::error::MfsError;
use super::node::NodeLink;

/// Meaningful segments of `path`
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
}

/// Walk `path` from `dir`, creating every missing directory on the way.
///
/// Fails with `NotADirectory` if a segment names a file; nothing is
///  overwritten. Directories created before a failure are kept.
pub async fn mkdir_p(
    dir: &Directory,
    path: &str,
    cancel: &CancellationToken,
) -> Result<Directory, MfsError> {
    let mut current = dir.clone();
    for segment in segments(path) {
        current = current.child_or_mkdir(segment, cancel).await?;
    }
    Ok(current)
}

/// Resolve `path` from `dir` without creating anything
pub async fn lookup(
    dir: &Directory,
    path: &str,
    cancel: &CancellationToken,
) -> Result<FsNode, MfsError> {
    let mut node = FsNode::Dir(dir.clone());
    let mut parent_name = "";
    for segment in segments(path) {
        validate_name(segment)?;
        let current = node.into_dir(parent_name)?;
        node = current.child(segment, cancel).await?;
        parent_name = segment;
    }
    Ok(node)
}

/// Resolve `path` from `dir` as a directory
pub async fn lookup_dir(
    dir: &Directory,
    path: &str,
    cancel: &CancellationToken,
) -> Result<Directory, MfsError> {
    lookup(dir, path, cancel).await?.into_dir(path)
}

/// `mkdir -p` the parent path, then link `link` under `name` in it
pub async fn put_node(
    dir: &Directory,
    path: &str,
    name: &str,
    link: NodeLink,
    cancel: &CancellationToken,
) -> Result<Directory, MfsError> {
    let parent = mkdir_p(dir, path, cancel).await?;
    parent.add_child(name, link, cancel).await?;
    Ok(parent)
}

/// Move the entry at `from` to `to`, both relative to `dir`.
///
/// Missing directories above `to` are created. Fails if `to` already exists
///  or lies inside `from`. The moved node keeps its in-memory state, so
///  unflushed changes move with it.
pub async fn mv(
    dir: &Directory,
    from: &str,
    to: &str,
    cancel: &CancellationToken,
) -> Result<(), MfsError> {
    let from_segments: Vec<&str> = segments(from).collect();
    let to_segments: Vec<&str> = segments(to).collect();

    if to_segments.starts_with(&from_segments) {
        return Err(MfsError::MoveIntoSelf {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    let Some((from_name, from_parent)) = from_segments.split_last() else {
        return Err(MfsError::InvalidName(from.to_string()));
    };
    let Some((to_name, to_parent)) = to_segments.split_last() else {
        return Err(MfsError::InvalidName(to.to_string()));
    };

    let source = lookup_dir(dir, &from_parent.join("/"), cancel).await?;
    // surface a missing source before creating anything at the destination
    source.child(from_name, cancel).await?;
    let target = mkdir_p(dir, &to_parent.join("/"), cancel).await?;

    tracing::debug!("mv: {} -> {}", from, to);
    source.move_child(from_name, &target, to_name, cancel).await
}

/// Flush only the subtree at `path`. Ancestors stay dirty.
pub async fn flush_path(
    dir: &Directory,
    path: &str,
    cancel: &CancellationToken,
) -> Result<Cid, MfsError> {
    let node = lookup(dir, path, cancel).await?;
    let link = node.flush(cancel).await?;
    Ok(*link.cid())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_segments_skip_empty_and_dot() {
        assert_eq!(segments("").count(), 0);
        assert_eq!(segments("/./").count(), 0);
        assert_eq!(
            segments("/a//b/./c/").collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert_eq!(segments("a/../b").collect::<Vec<_>>(), vec!["a", "..", "b"]);
    }
}
