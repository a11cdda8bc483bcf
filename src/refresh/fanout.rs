//! Bounded-concurrency aggregate fetch for fleet panels.
//!
//! At most `ceiling` fetches run at once. Results are collected until every
//! leg reports or the overall deadline passes; legs still missing at the
//! deadline are reported as timeouts. One slow device never fails the others.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, bounded, unbounded};

use super::coordinator::{FetchCompletion, FetchRequest};
use super::fetcher::Fetcher;
use crate::core::config::FetchConfig;
use crate::core::errors::{DpcError, FetchError, Result};

/// Concurrency and time limits for one aggregate fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutLimits {
    /// Hard ceiling on simultaneous fetches.
    pub ceiling: usize,
    /// Deadline handed to each individual fetch.
    pub per_fetch: Duration,
    /// Deadline for the whole aggregate.
    pub overall: Duration,
}

impl FanOutLimits {
    /// Limits taken from the fetch section of the config.
    #[must_use]
    pub fn from_config(fetch: &FetchConfig) -> Self {
        Self {
            ceiling: fetch.fanout_ceiling,
            per_fetch: fetch.deadline(),
            overall: fetch.fanout_deadline(),
        }
    }
}

/// Run every request with at most `limits.ceiling` in flight and return one
/// completion per request, in request order. Blocks the calling thread.
pub fn fetch_bounded(
    fetcher: &Arc<dyn Fetcher>,
    requests: &[FetchRequest],
    limits: FanOutLimits,
) -> Result<Vec<FetchCompletion>> {
    if requests.is_empty() {
        return Ok(Vec::new());
    }

    let started = Instant::now();
    let (job_tx, job_rx) = bounded::<(usize, FetchRequest)>(requests.len());
    let (done_tx, done_rx) = unbounded::<(usize, FetchCompletion)>();
    for (idx, request) in requests.iter().enumerate() {
        // Capacity equals the request count, so this never blocks.
        let _ = job_tx.send((idx, request.clone()));
    }
    drop(job_tx);

    let lanes = limits.ceiling.max(1).min(requests.len());
    for lane in 0..lanes {
        let job_rx = job_rx.clone();
        let done_tx = done_tx.clone();
        let fetcher = Arc::clone(fetcher);
        let per_fetch = limits.per_fetch;
        let overall_deadline = started + limits.overall;
        thread::Builder::new()
            .name(format!("dpc-fanout-{lane}"))
            .spawn(move || {
                while let Ok((idx, request)) = job_rx.recv() {
                    if Instant::now() >= overall_deadline {
                        break;
                    }
                    let ctx = request.context().capped(per_fetch);
                    let result = if ctx.is_expired() {
                        Err(ctx.deadline_exceeded())
                    } else {
                        fetcher.fetch(&ctx, &request.key.subject, request.key.kind)
                    };
                    if done_tx
                        .send((idx, FetchCompletion::for_request(&request, result)))
                        .is_err()
                    {
                        break;
                    }
                }
            })
            .map_err(|e| DpcError::Runtime {
                details: format!("failed to spawn fan-out lane: {e}"),
            })?;
    }
    drop(done_tx);

    let mut slots: Vec<Option<FetchCompletion>> = vec![None; requests.len()];
    let mut received = 0;
    let overall_deadline = started + limits.overall;
    while received < requests.len() {
        let remaining = overall_deadline.saturating_duration_since(Instant::now());
        match done_rx.recv_timeout(remaining) {
            Ok((idx, completion)) => {
                if slots[idx].is_none() {
                    received += 1;
                }
                slots[idx] = Some(completion);
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
        }
    }

    let after_ms = u64::try_from(limits.overall.as_millis()).unwrap_or(u64::MAX);
    Ok(slots
        .into_iter()
        .zip(requests)
        .map(|(slot, request)| {
            slot.unwrap_or_else(|| {
                FetchCompletion::for_request(
                    request,
                    Err(FetchError::DeadlineExceeded { after_ms }),
                )
            })
        })
        .collect())
}

/// Run [`fetch_bounded`] on a background thread and pass the completions to
/// `deliver` as a single batch.
pub fn spawn_fan_out<D>(
    fetcher: Arc<dyn Fetcher>,
    requests: Vec<FetchRequest>,
    limits: FanOutLimits,
    deliver: D,
) -> Result<thread::JoinHandle<()>>
where
    D: FnOnce(Vec<FetchCompletion>) + Send + 'static,
{
    thread::Builder::new()
        .name("dpc-fanout".to_string())
        .spawn(move || {
            let completions = fetch_bounded(&fetcher, &requests, limits).unwrap_or_else(|e| {
                eprintln!("[DPC-FANOUT] aggregate fetch failed: {e}");
                requests
                    .iter()
                    .map(|request| {
                        FetchCompletion::for_request(
                            request,
                            Err(FetchError::Transport {
                                details: e.to_string(),
                            }),
                        )
                    })
                    .collect()
            });
            deliver(completions);
        })
        .map_err(|e| DpcError::Runtime {
            details: format!("failed to spawn fan-out collector: {e}"),
        })
}
