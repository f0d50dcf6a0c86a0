//! Flush results held back until every block is in the store.
//!
//! A flush first walks the dirty tree storing blocks and collecting what it
//! would record, then records all of it in one pass. If anything fails or the
//! caller cancels along the way, the collected results are dropped and every
//! node keeps the identifier and dirty state it had before the flush.

use tokio_util::sync::CancellationToken;

use crate::linked_data::Cid;

use super::directory::{DirRecord, Directory};
use super::error::MfsError;
use super::file::File;

pub(crate) enum Commit {
    File { file: File, cid: Cid, epoch: u64 },
    Dir { dir: Directory, record: DirRecord },
}

/// Commits in the order nodes were stored, children before parents
#[derive(Default)]
pub(crate) struct Staged {
    commits: Vec<Commit>,
}

impl Staged {
    pub(crate) fn push(&mut self, commit: Commit) {
        self.commits.push(commit);
    }

    /// Record every staged identifier.
    ///  Nothing is recorded if `cancel` fired while blocks were being stored.
    pub(crate) async fn commit(self, cancel: &CancellationToken) -> Result<(), MfsError> {
        if cancel.is_cancelled() {
            tracing::debug!(
                "Staged::commit: cancelled, dropping {} staged nodes",
                self.commits.len()
            );
            return Err(MfsError::Cancelled);
        }
        for commit in self.commits {
            match commit {
                Commit::File { file, cid, epoch } => file.commit(cid, epoch).await,
                Commit::Dir { dir, record } => dir.commit(record).await,
            }
        }
        Ok(())
    }
}
