//! Single-writer update queue
//!
//! One worker task owns the list state and runs submitted mutations one at a
//! time, in submission order. A mutation may suspend; the next one starts
//! only after it finishes.

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{LiveListError, Result};

type Job<S> = Box<dyn for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send>;

struct Entry<S> {
    token: CancellationToken,
    label: &'static str,
    job: Job<S>,
}

/// Handle to the worker that owns `S`.
pub struct UpdateQueue<S> {
    sender: mpsc::UnboundedSender<Entry<S>>,
}

impl<S> Clone for UpdateQueue<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<S: Send + 'static> UpdateQueue<S> {
    /// Start the worker. It runs until `shutdown` is cancelled or every
    /// handle is dropped.
    pub fn spawn(mut state: S, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Entry<S>>();
        let worker = tokio::spawn(async move {
            loop {
                let entry = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    entry = receiver.recv() => match entry {
                        Some(entry) => entry,
                        None => break,
                    },
                };
                if entry.token.is_cancelled() {
                    tracing::trace!(job = entry.label, "skipping cancelled job");
                    continue;
                }
                (entry.job)(&mut state).await;
            }
            tracing::debug!("update queue stopped");
        });
        (Self { sender }, worker)
    }

    /// Queue a mutation. It is skipped if `token` is cancelled before it starts.
    pub fn submit<F>(&self, token: &CancellationToken, label: &'static str, job: F) -> Result<()>
    where
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send + 'static,
    {
        self.sender
            .send(Entry {
                token: token.clone(),
                label,
                job: Box::new(job),
            })
            .map_err(|_| LiveListError::EngineStopped)
    }

    /// Run a read against the state in queue order and return its result.
    pub async fn request<R, F>(&self, token: &CancellationToken, read: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&S) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(token, "request", move |state: &mut S| {
            let _ = tx.send(read(state));
            async {}.boxed()
        })?;
        rx.await.map_err(|_| LiveListError::EngineStopped)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
