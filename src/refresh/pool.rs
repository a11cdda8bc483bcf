//! Fixed-size fetch worker pool.
//!
//! Named worker threads pull jobs from a bounded crossbeam channel, call the
//! injected [`Fetcher`], and hand the result to a reply callback (the runtime
//! forwards it into the event-loop channel). Submission is non-blocking: a
//! full queue hands the job back to the caller instead of stalling the loop.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use super::coordinator::{FetchCompletion, FetchRequest};
use super::fetcher::{FetchContext, Fetcher, Mutation};
use crate::core::errors::{DpcError, FetchError, Result};

/// Work accepted by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchJob {
    /// Load or refresh one key.
    Fetch(FetchRequest),
    /// Apply a mutation.
    Mutate {
        /// Opaque caller id, echoed back in the completion.
        origin: u32,
        /// Change to apply.
        mutation: Mutation,
    },
}

/// Result of a mutation job. `origin` is the opaque id supplied at submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationCompletion {
    /// Caller id passed to submit.
    pub origin: u32,
    /// The mutation that was attempted.
    pub mutation: Mutation,
    /// Outcome reported by the fetcher.
    pub result: std::result::Result<(), FetchError>,
}

/// Everything a worker can report.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolReply {
    /// A fetch job finished.
    Fetched(FetchCompletion),
    /// A mutation job finished.
    Mutated(MutationCompletion),
}

impl FetchJob {
    /// The reply a job produces when it cannot be queued.
    #[must_use]
    pub fn rejected(self, reason: &str) -> PoolReply {
        let error = FetchError::Transport {
            details: reason.to_string(),
        };
        match self {
            Self::Fetch(request) => {
                PoolReply::Fetched(FetchCompletion::for_request(&request, Err(error)))
            }
            Self::Mutate { origin, mutation } => PoolReply::Mutated(MutationCompletion {
                origin,
                mutation,
                result: Err(error),
            }),
        }
    }
}

type ReplyFn = dyn Fn(PoolReply) + Send + Sync;

/// Handle to the running workers. Dropping it closes the queue; workers exit
/// after finishing their current job.
pub struct FetchPool {
    tx: Option<Sender<FetchJob>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for FetchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchPool")
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl FetchPool {
    /// Spawn `workers` threads named `dpc-fetch-N`.
    pub fn spawn<R>(
        fetcher: Arc<dyn Fetcher>,
        workers: usize,
        queue_capacity: usize,
        deadline: Duration,
        reply: R,
    ) -> Result<Self>
    where
        R: Fn(PoolReply) + Send + Sync + 'static,
    {
        let (tx, rx) = bounded::<FetchJob>(queue_capacity.max(1));
        let reply: Arc<ReplyFn> = Arc::new(reply);
        let mut handles = Vec::with_capacity(workers.max(1));
        for idx in 0..workers.max(1) {
            let rx = rx.clone();
            let fetcher = Arc::clone(&fetcher);
            let reply = Arc::clone(&reply);
            let handle = thread::Builder::new()
                .name(format!("dpc-fetch-{idx}"))
                .spawn(move || worker_main(&rx, fetcher.as_ref(), deadline, reply.as_ref()))
                .map_err(|e| DpcError::Runtime {
                    details: format!("failed to spawn fetch worker: {e}"),
                })?;
            handles.push(handle);
        }
        Ok(Self {
            tx: Some(tx),
            workers: handles,
        })
    }

    /// Queue a job without blocking. On failure the job is handed back.
    pub fn submit(&self, job: FetchJob) -> std::result::Result<(), FetchJob> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(job);
        };
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job) | TrySendError::Disconnected(job)) => Err(job),
        }
    }

    /// Number of live worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Close the queue and wait for workers to drain.
    pub fn shutdown(mut self) {
        self.close_and_join();
    }

    fn close_and_join(&mut self) {
        self.tx = None;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                eprintln!("[DPC-POOL] fetch worker panicked");
            }
        }
    }
}

impl Drop for FetchPool {
    fn drop(&mut self) {
        self.tx = None;
    }
}

fn worker_main(rx: &Receiver<FetchJob>, fetcher: &dyn Fetcher, deadline: Duration, reply: &ReplyFn) {
    while let Ok(job) = rx.recv() {
        let out = match job {
            FetchJob::Fetch(request) => {
                let ctx = request.context();
                let result = if ctx.is_expired() {
                    Err(ctx.deadline_exceeded())
                } else {
                    fetcher.fetch(&ctx, &request.key.subject, request.key.kind)
                };
                PoolReply::Fetched(FetchCompletion::for_request(&request, result))
            }
            FetchJob::Mutate { origin, mutation } => {
                let ctx = FetchContext::new(deadline);
                let result = fetcher.mutate(&ctx, &mutation);
                PoolReply::Mutated(MutationCompletion {
                    origin,
                    mutation,
                    result,
                })
            }
        };
        reply(out);
    }
}
