//! Debounced root publishing
//!
//! Flushes can come in bursts. Rather than notifying the publisher for every
//! one, the root hands each new identifier to a background worker which waits
//! for a short quiet period, bounded by a long maximum delay, and then
//! publishes only the latest value.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::linked_data::Cid;

use super::config::PublishConfig;
use super::error::MfsError;

/// Receives the identifier of every new root
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, cid: Cid) -> anyhow::Result<()>;
}

enum Command {
    Update(Cid),
    Close(oneshot::Sender<Result<(), MfsError>>),
}

struct Pending {
    cid: Cid,
    first_update: Instant,
    last_update: Instant,
}

/// Handle to the background publish worker.
///
/// Dropping it stops the worker without publishing what is pending;
///  use [`Republisher::close`] to publish first.
pub(crate) struct Republisher {
    tx: flume::Sender<Command>,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Republisher {
    pub(crate) fn spawn(publisher: Arc<dyn Publisher>, config: PublishConfig) -> Self {
        let (tx, rx) = flume::unbounded();
        let shutdown = CancellationToken::new();
        let worker = Worker {
            publisher,
            config,
            pending: None,
        };
        let handle = tokio::spawn(worker.run(rx, shutdown.clone()));
        Self {
            tx,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Queue `cid` for publishing
    pub(crate) fn update(&self, cid: Cid) {
        if self.tx.send(Command::Update(cid)).is_err() {
            tracing::warn!("Republisher::update: worker is gone, dropping {}", cid);
        }
    }

    /// Publish whatever is pending right away and stop the worker
    pub(crate) async fn close(mut self) -> Result<(), MfsError> {
        let (reply, done) = oneshot::channel();
        if self.tx.send(Command::Close(reply)).is_err() {
            return Ok(());
        }
        let result = done.await.unwrap_or(Ok(()));
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("Republisher::close: worker failed: {}", e);
            }
        }
        result
    }
}

impl Drop for Republisher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Worker {
    publisher: Arc<dyn Publisher>,
    config: PublishConfig,
    pending: Option<Pending>,
}

impl Worker {
    async fn run(mut self, rx: flume::Receiver<Command>, shutdown: CancellationToken) {
        loop {
            let deadline = self.deadline();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    if let Some(pending) = &self.pending {
                        tracing::debug!("Republisher: shut down with {} unpublished", pending.cid);
                    }
                    break;
                }
                command = rx.recv_async() => match command {
                    Ok(Command::Update(cid)) => self.queue(cid),
                    Ok(Command::Close(reply)) => {
                        let result = self.publish_pending().await;
                        let _ = reply.send(result);
                        break;
                    }
                    // every sender is gone
                    Err(_) => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Err(e) = self.publish_pending().await {
                        tracing::error!("Republisher: {}", e);
                    }
                }
            }
        }
    }

    fn queue(&mut self, cid: Cid) {
        let now = Instant::now();
        match &mut self.pending {
            Some(pending) => {
                pending.cid = cid;
                pending.last_update = now;
            }
            None => {
                self.pending = Some(Pending {
                    cid,
                    first_update: now,
                    last_update: now,
                })
            }
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| {
            let quiet = pending.last_update + self.config.short_delay();
            let longest = pending.first_update + self.config.long_delay();
            quiet.min(longest)
        })
    }

    async fn publish_pending(&mut self) -> Result<(), MfsError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        tracing::info!("Republisher: publishing {}", pending.cid);
        self.publisher.publish(pending.cid).await.map_err(|e| {
            tracing::warn!("Republisher: failed to publish {}: {}", pending.cid, e);
            MfsError::Publish(e)
        })
    }
}
