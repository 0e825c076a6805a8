//! Streaming uploads driven by a background task
//!
//! An [`UploadStream`] is the writable half of an in-flight upload. Bytes are
//! handed to a spawned task over a bounded channel; the task talks to the
//! backend. Finishing the stream closes the channel and waits for the task's
//! verdict. Cancelling (or dropping) the stream trips a cancellation token so
//! the task abandons the upload without committing anything.

use bytes::Bytes;
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{VfsError, VfsResult};

const CHANNEL_DEPTH: usize = 8;

/// Writable side of an in-flight upload
pub struct UploadStream {
    backend: String,
    sender: Option<mpsc::Sender<Bytes>>,
    cancel: CancellationToken,
    done: Option<oneshot::Receiver<VfsResult<()>>>,
    written: u64,
}

/// Task side of an upload: yields chunks until the writer finishes or cancels
pub struct UploadChunks {
    receiver: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
}

impl UploadChunks {
    /// Next chunk, `None` once the writer finished, `Err(Cancelled)` if abandoned
    pub async fn next(&mut self) -> VfsResult<Option<Bytes>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(VfsError::Cancelled),
            chunk = self.receiver.recv() => {
                // Cancellation is signalled before the sender is dropped
                if chunk.is_none() && self.cancel.is_cancelled() {
                    return Err(VfsError::Cancelled);
                }
                Ok(chunk)
            }
        }
    }

    /// Fail with `Cancelled` if the writer abandoned the upload
    pub fn ensure_live(&self) -> VfsResult<()> {
        if self.cancel.is_cancelled() {
            Err(VfsError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl UploadStream {
    /// Spawn `task` on the runtime and return the writer feeding it
    pub fn spawn<F, Fut>(backend: impl Into<String>, task: F) -> Self
    where
        F: FnOnce(UploadChunks) -> Fut + Send + 'static,
        Fut: Future<Output = VfsResult<()>> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(CHANNEL_DEPTH);
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        let chunks = UploadChunks {
            receiver,
            cancel: cancel.clone(),
        };

        tokio::spawn(async move {
            let result = task(chunks).await;
            // Receiver is gone when the stream was cancelled
            let _ = done_tx.send(result);
        });

        Self {
            backend: backend.into(),
            sender: Some(sender),
            cancel,
            done: Some(done_rx),
            written: 0,
        }
    }

    /// Hand `data` to the upload task
    pub async fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        let Some(sender) = self.sender.as_ref() else {
            return Err(VfsError::PreconditionFailed(
                "upload stream is no longer writable".to_string(),
            ));
        };
        if data.is_empty() {
            return Ok(0);
        }

        if sender.send(Bytes::copy_from_slice(data)).await.is_err() {
            // The task stopped early; surface its error
            self.sender = None;
            return Err(match self.done.take() {
                Some(done) => match done.await {
                    Ok(Err(e)) => e,
                    _ => VfsError::remote(&self.backend, "upload task ended unexpectedly"),
                },
                None => VfsError::remote(&self.backend, "upload task ended unexpectedly"),
            });
        }

        self.written += data.len() as u64;
        trace!(bytes = data.len(), total = self.written, "queued upload chunk");
        Ok(data.len())
    }

    /// Bytes accepted so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Abandon the upload; nothing is committed
    pub fn cancel(mut self) {
        self.abandon();
    }

    fn abandon(&mut self) {
        if self.done.is_some() || self.sender.is_some() {
            debug!(backend = %self.backend, written = self.written, "cancelling upload");
        }
        self.cancel.cancel();
        self.sender = None;
        self.done = None;
    }

    /// Close the stream and block until the upload task reports completion
    pub async fn finish(mut self) -> VfsResult<()> {
        // Dropping the sender ends the chunk sequence
        self.sender = None;
        let done = self.done.take();
        let result = match done {
            Some(done) => done.await.unwrap_or_else(|_| {
                Err(VfsError::remote(&self.backend, "upload task dropped its result"))
            }),
            None => Err(VfsError::PreconditionFailed(
                "upload stream already finished".to_string(),
            )),
        };
        debug!(backend = %self.backend, written = self.written, ok = result.is_ok(), "upload finished");
        result
    }
}

impl Drop for UploadStream {
    fn drop(&mut self) {
        if self.done.is_some() {
            self.abandon();
        }
    }
}

impl std::fmt::Debug for UploadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadStream")
            .field("backend", &self.backend)
            .field("written", &self.written)
            .field("open", &self.sender.is_some())
            .finish()
    }
}
