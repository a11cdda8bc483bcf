//! The event loop: the single owner of the dashboard model and the cache.
//!
//! Messages from the input thread, fetch workers and fan-out threads arrive on
//! one bounded crossbeam channel. Each message runs through [`update`] on this
//! thread, and the returned command is executed here: fetches go to the
//! [`FetchPool`], fleet loads to a fan-out thread, diagnostics to the logger.
//! Nothing on this thread blocks on device I/O.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, bounded, select, tick};

use crate::cache::store::CacheStore;
use crate::core::config::Config;
use crate::core::errors::{FetchError, Result};
use crate::logger::{DiagnosticEvent, DiagnosticsLogger};
use crate::refresh::coordinator::FetchCompletion;
use crate::refresh::fanout::{FanOutLimits, spawn_fan_out};
use crate::refresh::fetcher::Fetcher;
use crate::refresh::pool::{FetchJob, FetchPool, PoolReply};
use crate::tui::model::{DashboardCmd, DashboardModel, DashboardMsg};
use crate::tui::panel::CacheContext;
use crate::tui::snapshot::{DashboardSnapshot, RenderSink};
use crate::tui::update::update;

/// Why [`EventLoop::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Quit,
    TickLimit,
    Disconnected,
}

impl StopReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quit => "quit",
            Self::TickLimit => "tick_limit",
            Self::Disconnected => "disconnected",
        }
    }
}

pub struct EventLoop {
    model: DashboardModel,
    ctx: CacheContext,
    fetcher: Arc<dyn Fetcher>,
    pool: Option<FetchPool>,
    fanout: FanOutLimits,
    tx: Sender<DashboardMsg>,
    rx: Receiver<DashboardMsg>,
    /// Messages produced on this thread, handled before the channel.
    inbox: VecDeque<DashboardMsg>,
    /// Jobs the pool queue had no room for, retried in order.
    backlog: VecDeque<FetchJob>,
    fanouts: Vec<JoinHandle<()>>,
    logger: DiagnosticsLogger,
    tick_interval: Duration,
    config_hash: String,
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("panels", &self.model.panels.len())
            .field("outstanding", &self.ctx.coordinator.outstanding())
            .field("backlog", &self.backlog.len())
            .finish_non_exhaustive()
    }
}

impl EventLoop {
    /// Build the loop and start the fetch workers.
    ///
    /// # Errors
    /// Fails if worker threads cannot be spawned or the config cannot be hashed.
    pub fn new(
        config: &Config,
        store: CacheStore,
        fetcher: Arc<dyn Fetcher>,
        logger: DiagnosticsLogger,
    ) -> Result<Self> {
        let (tx, rx) = bounded(config.ui.message_channel_capacity.max(1));
        let reply_tx = tx.clone();
        let pool = FetchPool::spawn(
            Arc::clone(&fetcher),
            config.fetch.worker_threads,
            config.fetch.worker_threads.saturating_mul(4),
            config.fetch.deadline(),
            move |reply| {
                let msg = match reply {
                    PoolReply::Fetched(completion) => DashboardMsg::FetchComplete(completion),
                    PoolReply::Mutated(completion) => DashboardMsg::MutationComplete(completion),
                };
                let _ = reply_tx.send(msg);
            },
        )?;

        Ok(Self {
            model: DashboardModel::new(&config.ui, config.cache.evict_on_close, (0, 0)),
            ctx: CacheContext::from_config(config, store),
            fetcher,
            pool: Some(pool),
            fanout: FanOutLimits::from_config(&config.fetch),
            tx,
            rx,
            inbox: VecDeque::new(),
            backlog: VecDeque::new(),
            fanouts: Vec::new(),
            logger,
            tick_interval: config.ui.tick_interval(),
            config_hash: config.stable_hash()?,
        })
    }

    /// Handle for other threads to post messages.
    #[must_use]
    pub fn sender(&self) -> Sender<DashboardMsg> {
        self.tx.clone()
    }

    #[must_use]
    pub const fn model(&self) -> &DashboardModel {
        &self.model
    }

    #[must_use]
    pub const fn context(&self) -> &CacheContext {
        &self.ctx
    }

    #[must_use]
    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot::capture(&self.model)
    }

    /// Handle one message now, plus anything it queued locally. Returns
    /// `false` once the dashboard has quit.
    pub fn dispatch(&mut self, msg: DashboardMsg) -> bool {
        self.dispatch_at(msg, Utc::now())
    }

    /// [`dispatch`](Self::dispatch) at an explicit wall-clock time.
    pub fn dispatch_at(&mut self, msg: DashboardMsg, now: DateTime<Utc>) -> bool {
        self.step(msg, now);
        while let Some(next) = self.inbox.pop_front() {
            self.step(next, now);
        }
        !self.model.quit
    }

    /// Handle every message already queued, waiting up to `timeout` for the
    /// first. Returns how many channel messages were handled.
    pub fn pump(&mut self, timeout: Duration) -> usize {
        let mut handled = 0;
        if let Ok(msg) = self.rx.recv_timeout(timeout) {
            self.dispatch(msg);
            handled += 1;
        }
        while let Ok(msg) = self.rx.try_recv() {
            self.dispatch(msg);
            handled += 1;
        }
        self.retry_backlog();
        handled
    }

    /// Run until quit, until `max_ticks` ticks have elapsed, or until every
    /// sender is gone. Renders after every step.
    ///
    /// # Errors
    /// Propagates render failures.
    pub fn run<S: RenderSink + ?Sized>(
        &mut self,
        sink: &mut S,
        max_ticks: Option<u64>,
    ) -> Result<StopReason> {
        self.logger.send(DiagnosticEvent::LoopStarted {
            config_hash: self.config_hash.clone(),
            panels: self.model.panels.len(),
        });
        sink.render(&self.snapshot())?;

        let rx = self.rx.clone();
        let ticker = tick(self.tick_interval);
        let mut ticks = 0_u64;
        let reason = loop {
            if self.model.quit {
                break StopReason::Quit;
            }
            if max_ticks.is_some_and(|limit| ticks >= limit) {
                break StopReason::TickLimit;
            }
            let msg = select! {
                recv(rx) -> msg => match msg {
                    Ok(msg) => msg,
                    Err(_) => break StopReason::Disconnected,
                },
                recv(ticker) -> _ => {
                    ticks += 1;
                    DashboardMsg::Tick
                },
            };
            self.dispatch(msg);
            self.retry_backlog();
            self.reap_fanouts();
            sink.render(&self.snapshot())?;
        };

        self.logger.send(DiagnosticEvent::LoopStopped {
            reason: reason.as_str().to_string(),
            ticks: self.model.tick,
        });
        Ok(reason)
    }

    /// Stop the workers and wait for in-flight fan-outs. The message channel
    /// is closed first, so a worker blocked on a full channel gets a send
    /// error instead of waiting for a reader that is gone.
    pub fn shutdown(self) {
        let Self {
            rx,
            tx,
            pool,
            fanouts,
            ..
        } = self;
        drop(rx);
        drop(tx);
        if let Some(pool) = pool {
            pool.shutdown();
        }
        for handle in fanouts {
            if handle.join().is_err() {
                eprintln!("[DPC-FANOUT] fan-out thread panicked");
            }
        }
    }

    // ──────────────────── command execution ────────────────────

    fn step(&mut self, msg: DashboardMsg, now: DateTime<Utc>) {
        let cmd = update(&mut self.model, &mut self.ctx, msg, now);
        self.execute(cmd);
    }

    fn execute(&mut self, cmd: DashboardCmd) {
        for cmd in cmd.flatten() {
            match cmd {
                DashboardCmd::None | DashboardCmd::Quit | DashboardCmd::Batch(_) => {}
                DashboardCmd::Fetch(request) => self.submit(FetchJob::Fetch(request)),
                DashboardCmd::Mutate { panel, mutation } => self.submit(FetchJob::Mutate {
                    origin: panel.0,
                    mutation,
                }),
                DashboardCmd::FanOut { panel, requests } => {
                    let tx = self.tx.clone();
                    let spawned = spawn_fan_out(
                        Arc::clone(&self.fetcher),
                        requests.clone(),
                        self.fanout,
                        move |completions| {
                            let _ = tx.send(DashboardMsg::AggregateComplete { panel, completions });
                        },
                    );
                    match spawned {
                        Ok(handle) => self.fanouts.push(handle),
                        Err(e) => {
                            let completions = requests
                                .iter()
                                .map(|request| {
                                    FetchCompletion::for_request(
                                        request,
                                        Err(FetchError::Transport {
                                            details: e.to_string(),
                                        }),
                                    )
                                })
                                .collect();
                            self.inbox
                                .push_back(DashboardMsg::AggregateComplete { panel, completions });
                        }
                    }
                }
                DashboardCmd::Log(event) => self.logger.send(event),
            }
        }
    }

    fn submit(&mut self, job: FetchJob) {
        if !self.backlog.is_empty() {
            self.backlog.push_back(job);
            return;
        }
        let Some(pool) = self.pool.as_ref() else {
            self.inbox.push_back(reply_message(job.rejected("fetch pool closed")));
            return;
        };
        if let Err(job) = pool.submit(job) {
            self.backlog.push_back(job);
        }
    }

    fn retry_backlog(&mut self) {
        let Some(pool) = self.pool.as_ref() else {
            return;
        };
        while let Some(job) = self.backlog.pop_front() {
            if let Err(job) = pool.submit(job) {
                self.backlog.push_front(job);
                break;
            }
        }
    }

    fn reap_fanouts(&mut self) {
        self.fanouts.retain(|handle| !handle.is_finished());
    }
}

fn reply_message(reply: PoolReply) -> DashboardMsg {
    match reply {
        PoolReply::Fetched(completion) => DashboardMsg::FetchComplete(completion),
        PoolReply::Mutated(completion) => DashboardMsg::MutationComplete(completion),
    }
}
