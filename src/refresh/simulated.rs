//! In-process device simulator implementing [`Fetcher`].
//!
//! Used by the `dpc` binary and by tests that need realistic latency and
//! failure behavior without hardware. Randomness comes from a seeded RNG so a
//! run can be replayed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value, json};

use super::fetcher::{FetchContext, FetchResult, Fetcher, Mutation};
use crate::cache::entry::Payload;
use crate::cache::key::{DataKind, SubjectId};
use crate::core::errors::FetchError;

/// Number of scene rows a simulated device reports.
const SCENE_COUNT: usize = 50;

/// In-process fake device backend with seeded latency and failures.
pub struct SimulatedFetcher {
    latency: Duration,
    jitter: Duration,
    failure_rate: f64,
    unreachable: HashSet<SubjectId>,
    rng: Mutex<StdRng>,
    config_overrides: Mutex<HashMap<SubjectId, BTreeMap<String, String>>>,
    fetches: AtomicU64,
    mutations: AtomicU64,
}

impl std::fmt::Debug for SimulatedFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedFetcher")
            .field("latency", &self.latency)
            .field("failure_rate", &self.failure_rate)
            .field("fetches", &self.fetch_count())
            .finish_non_exhaustive()
    }
}

impl SimulatedFetcher {
    /// Fetcher with no latency and no failures, seeded for repeatable payloads.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            latency: Duration::from_millis(50),
            jitter: Duration::ZERO,
            failure_rate: 0.0,
            unreachable: HashSet::new(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            config_overrides: Mutex::new(HashMap::new()),
            fetches: AtomicU64::new(0),
            mutations: AtomicU64::new(0),
        }
    }

    /// Base delay for every call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Random extra delay up to `jitter`.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Probability in `[0, 1]` that any call fails as unreachable.
    #[must_use]
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Mark `subject` as permanently offline.
    #[must_use]
    pub fn with_unreachable(mut self, subject: impl Into<SubjectId>) -> Self {
        self.unreachable.insert(subject.into());
        self
    }

    /// Fetch calls served so far.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Mutation calls served so far.
    #[must_use]
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    /// Sleep for the simulated round trip, bounded by the deadline.
    fn round_trip(&self, ctx: &FetchContext, subject: &SubjectId) -> Result<(), FetchError> {
        let (delay, fail) = {
            let mut rng = self.rng.lock();
            let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
            let extra = if jitter_ms == 0 {
                0
            } else {
                rng.random_range(0..=jitter_ms)
            };
            let fail = self.failure_rate > 0.0 && rng.random::<f64>() < self.failure_rate;
            (self.latency + Duration::from_millis(extra), fail)
        };

        if delay > ctx.remaining() {
            thread::sleep(ctx.remaining());
            return Err(ctx.deadline_exceeded());
        }
        thread::sleep(delay);

        if self.unreachable.contains(subject) {
            return Err(FetchError::Unreachable {
                details: format!("{subject} is offline"),
            });
        }
        if fail {
            return Err(FetchError::Unreachable {
                details: format!("{subject} did not answer"),
            });
        }
        Ok(())
    }

    fn payload_for(&self, subject: &SubjectId, kind: DataKind, call: u64) -> Value {
        let seed = subject
            .as_str()
            .bytes()
            .fold(0_u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
        match kind {
            DataKind::Status => json!({
                "online": true,
                "uptime_s": 3_600 + call * 7,
                "rssi": -40 - i64::try_from(seed % 40).unwrap_or(0),
            }),
            DataKind::Inputs => Value::Array(
                (0..4)
                    .map(|i| json!({"id": i, "name": format!("Input {i}"), "state": (seed + call + i) % 2 == 0}))
                    .collect(),
            ),
            DataKind::Energy => {
                let watts = (seed % 900) as f64 + (call % 17) as f64 * 1.5;
                json!({"power_w": watts, "voltage_v": 230.4, "total_wh": 12_000 + call * 3})
            }
            DataKind::Scenes => Value::Array(
                (0..SCENE_COUNT)
                    .map(|i| Value::String(format!("scene {i:02}")))
                    .collect(),
            ),
            DataKind::Templates => Value::Array(
                ["toggle", "dim", "schedule", "notify", "cycle"]
                    .iter()
                    .map(|name| Value::String((*name).to_string()))
                    .collect(),
            ),
            DataKind::Alerts => Value::Array(
                (0..(seed % 4))
                    .map(|i| json!({"id": i, "rule": "power_w > 2000", "fired": false}))
                    .collect(),
            ),
            DataKind::Config => {
                let mut config = Map::new();
                config.insert("name".into(), json!(format!("{subject} switch")));
                config.insert("initial_state".into(), json!("off"));
                config.insert("auto_on_delay".into(), json!("0"));
                config.insert("auto_off_delay".into(), json!("0"));
                config.insert("power_limit".into(), json!("2500"));
                if let Some(overrides) = self.config_overrides.lock().get(subject) {
                    for (field, value) in overrides {
                        config.insert(field.clone(), Value::String(value.clone()));
                    }
                }
                Value::Object(config)
            }
            DataKind::Firmware => json!({"version": "1.4.2", "update_available": seed % 3 == 0}),
        }
    }
}

impl Fetcher for SimulatedFetcher {
    fn fetch(&self, ctx: &FetchContext, subject: &SubjectId, kind: DataKind) -> FetchResult {
        let call = self.fetches.fetch_add(1, Ordering::Relaxed) + 1;
        self.round_trip(ctx, subject)?;
        Ok(Payload::new(self.payload_for(subject, kind, call)))
    }

    fn mutate(&self, ctx: &FetchContext, mutation: &Mutation) -> Result<(), FetchError> {
        self.mutations.fetch_add(1, Ordering::Relaxed);
        if mutation.kind != DataKind::Config {
            return Err(FetchError::Rejected {
                details: format!("{} is read-only", mutation.kind),
            });
        }
        self.round_trip(ctx, &mutation.subject)?;
        self.config_overrides
            .lock()
            .entry(mutation.subject.clone())
            .or_default()
            .extend(mutation.changes.clone());
        Ok(())
    }
}
