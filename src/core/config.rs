//! Configuration system: TOML file + env var overrides + smart defaults.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::key::DataKind;
use crate::core::errors::{DpcError, Result};

/// Full configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    /// Staleness and persistence.
    pub cache: CacheConfig,
    /// Fetch deadlines and concurrency.
    pub fetch: FetchConfig,
    /// Event-loop pacing.
    pub ui: UiConfig,
    /// Diagnostics log.
    pub logging: LoggingConfig,
    /// Config and data locations.
    pub paths: PathsConfig,
}

/// Which persistent store the cache writes through to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackingKind {
    /// Memory only; nothing survives a restart.
    None,
    /// One JSON file per key under `paths.cache_dir`.
    #[default]
    Json,
    /// SQLite database under `paths.cache_dir` (requires the `sqlite` feature).
    Sqlite,
}

impl std::str::FromStr for BackingKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "memory" => Ok(Self::None),
            "json" => Ok(Self::Json),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unknown backing store {other:?}")),
        }
    }
}

/// Staleness and persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for kinds without an entry in `ttl_secs`.
    pub default_ttl_secs: u64,
    /// Per-kind TTL keyed by data kind name (e.g. `energy = 10`).
    pub ttl_secs: BTreeMap<String, u64>,
    /// Persistent store behind the in-memory map.
    pub backing: BackingKind,
    /// Drop a subject's entries when the last panel showing it closes.
    pub evict_on_close: bool,
}

/// Device fetch behavior and concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FetchConfig {
    /// Deadline handed to every fetcher call.
    pub deadline_ms: u64,
    /// Fetch worker threads servicing single-key loads and refreshes.
    pub worker_threads: usize,
    /// Hard ceiling on simultaneous fetches inside one aggregate fan-out.
    pub fanout_ceiling: usize,
    /// Overall deadline for an aggregate fan-out.
    pub fanout_deadline_ms: u64,
    /// Slack past the deadline before a silent ticket is expired.
    pub ticket_grace_ms: u64,
}

/// Event-loop pacing and viewport defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UiConfig {
    /// Interval between `Tick` messages (spinner, watchdog, revalidation).
    pub tick_interval_ms: u64,
    /// Visible panels revalidate their keys every this many ticks.
    pub revalidate_every_ticks: u64,
    /// Default list viewport height.
    pub visible_rows: usize,
    /// Capacity of the bounded channel feeding the event loop.
    pub message_channel_capacity: usize,
    /// Ticks before an info toast disappears.
    pub notification_ttl_ticks: u64,
}

/// Diagnostics JSONL log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write diagnostics at all.
    pub enabled: bool,
    /// Active log file.
    pub jsonl_path: PathBuf,
    /// Rotate once the file grows past this size.
    pub max_size_bytes: u64,
    /// Rotated files kept next to the active one.
    pub max_rotated_files: u32,
    /// Events buffered for the writer thread before new ones are dropped.
    pub channel_capacity: usize,
}

/// Filesystem paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    /// TOML file read at startup.
    pub config_file: PathBuf,
    /// Where backing stores keep their data.
    pub cache_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let ttl_secs = [
            (DataKind::Status, 15),
            (DataKind::Inputs, 60),
            (DataKind::Energy, 10),
            (DataKind::Scenes, 300),
            (DataKind::Templates, 3_600),
            (DataKind::Alerts, 60),
            (DataKind::Config, 3_600),
            (DataKind::Firmware, 6 * 3_600),
        ]
        .into_iter()
        .map(|(kind, secs)| (kind.as_str().to_string(), secs))
        .collect();
        Self {
            default_ttl_secs: 120,
            ttl_secs,
            backing: BackingKind::default(),
            evict_on_close: false,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 5_000,
            worker_threads: 4,
            fanout_ceiling: 4,
            fanout_deadline_ms: 12_000,
            ticket_grace_ms: 2_000,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            revalidate_every_ticks: 10,
            visible_rows: 10,
            message_channel_capacity: 256,
            notification_ttl_ticks: 50,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jsonl_path: data_dir().join("diagnostics.jsonl"),
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
            channel_capacity: 1_024,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_file: home_dir().join(".config").join("dpc").join("config.toml"),
            cache_dir: data_dir().join("cache"),
        }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[DPC-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

fn data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("dpc")
}

impl FetchConfig {
    /// Per-fetch deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Overall deadline for one fan-out.
    #[must_use]
    pub const fn fanout_deadline(&self) -> Duration {
        Duration::from_millis(self.fanout_deadline_ms)
    }

    /// Slack added to a ticket's deadline before the watchdog fires.
    #[must_use]
    pub const fn ticket_grace(&self) -> Duration {
        Duration::from_millis(self.ticket_grace_ms)
    }
}

impl UiConfig {
    /// Interval between ticks.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| DpcError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(DpcError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(|name| env::var(name).ok())?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for diagnostics.
    ///
    /// FNV-1a over canonical JSON, stable across processes and toolchains.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // cache
        set_u64(&mut lookup, "DPC_CACHE_DEFAULT_TTL_SECS", &mut self.cache.default_ttl_secs)?;
        for kind in DataKind::ALL {
            let name = format!(
                "DPC_CACHE_TTL_{}_SECS",
                kind.as_str().to_ascii_uppercase()
            );
            if let Some(raw) = lookup(&name) {
                let secs = parse_u64(&name, &raw)?;
                self.cache.ttl_secs.insert(kind.as_str().to_string(), secs);
            }
        }
        if let Some(raw) = lookup("DPC_CACHE_BACKING") {
            self.cache.backing = raw.parse().map_err(|details| DpcError::ConfigParse {
                context: "env",
                details: format!("DPC_CACHE_BACKING={raw:?}: {details}"),
            })?;
        }
        set_bool(&mut lookup, "DPC_CACHE_EVICT_ON_CLOSE", &mut self.cache.evict_on_close)?;

        // fetch
        set_u64(&mut lookup, "DPC_FETCH_DEADLINE_MS", &mut self.fetch.deadline_ms)?;
        set_usize(&mut lookup, "DPC_FETCH_WORKER_THREADS", &mut self.fetch.worker_threads)?;
        set_usize(&mut lookup, "DPC_FETCH_FANOUT_CEILING", &mut self.fetch.fanout_ceiling)?;
        set_u64(
            &mut lookup,
            "DPC_FETCH_FANOUT_DEADLINE_MS",
            &mut self.fetch.fanout_deadline_ms,
        )?;
        set_u64(&mut lookup, "DPC_FETCH_TICKET_GRACE_MS", &mut self.fetch.ticket_grace_ms)?;

        // ui
        set_u64(&mut lookup, "DPC_UI_TICK_INTERVAL_MS", &mut self.ui.tick_interval_ms)?;
        set_u64(
            &mut lookup,
            "DPC_UI_REVALIDATE_EVERY_TICKS",
            &mut self.ui.revalidate_every_ticks,
        )?;
        set_usize(&mut lookup, "DPC_UI_VISIBLE_ROWS", &mut self.ui.visible_rows)?;

        // logging
        set_bool(&mut lookup, "DPC_LOGGING_ENABLED", &mut self.logging.enabled)?;
        if let Some(raw) = lookup("DPC_LOGGING_JSONL_PATH") {
            self.logging.jsonl_path = PathBuf::from(raw);
        }

        // paths
        if let Some(raw) = lookup("DPC_CACHE_DIR") {
            self.paths.cache_dir = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Canonicalize TTL keys so `Energy`, `energy` and `ENERGY` collapse.
    fn normalize(&mut self) {
        let ttl_secs = std::mem::take(&mut self.cache.ttl_secs);
        self.cache.ttl_secs = ttl_secs
            .into_iter()
            .map(|(name, secs)| match name.parse::<DataKind>() {
                Ok(kind) => (kind.as_str().to_string(), secs),
                Err(_) => (name, secs),
            })
            .collect();
    }

    fn validate(&self) -> Result<()> {
        for name in self.cache.ttl_secs.keys() {
            if name.parse::<DataKind>().is_err() {
                return Err(DpcError::InvalidConfig {
                    details: format!("cache.ttl_secs has unknown data kind {name:?}"),
                });
            }
        }

        #[cfg(not(feature = "sqlite"))]
        if self.cache.backing == BackingKind::Sqlite {
            return Err(DpcError::InvalidConfig {
                details: "cache.backing = \"sqlite\" requires the sqlite feature".to_string(),
            });
        }

        for (name, val) in [
            ("fetch.deadline_ms", self.fetch.deadline_ms),
            ("fetch.fanout_deadline_ms", self.fetch.fanout_deadline_ms),
            ("ui.revalidate_every_ticks", self.ui.revalidate_every_ticks),
        ] {
            if val == 0 {
                return Err(DpcError::InvalidConfig {
                    details: format!("{name} must be > 0"),
                });
            }
        }

        for (name, val) in [
            ("fetch.worker_threads", self.fetch.worker_threads),
            ("fetch.fanout_ceiling", self.fetch.fanout_ceiling),
            ("ui.visible_rows", self.ui.visible_rows),
            ("ui.message_channel_capacity", self.ui.message_channel_capacity),
            ("logging.channel_capacity", self.logging.channel_capacity),
        ] {
            if val == 0 {
                return Err(DpcError::InvalidConfig {
                    details: format!("{name} must be >= 1"),
                });
            }
        }

        if self.fetch.fanout_deadline_ms < self.fetch.deadline_ms {
            return Err(DpcError::InvalidConfig {
                details: format!(
                    "fetch.fanout_deadline_ms ({}) must be >= fetch.deadline_ms ({})",
                    self.fetch.fanout_deadline_ms, self.fetch.deadline_ms
                ),
            });
        }

        if self.ui.tick_interval_ms < 10 {
            return Err(DpcError::InvalidConfig {
                details: format!(
                    "ui.tick_interval_ms must be >= 10, got {}",
                    self.ui.tick_interval_ms
                ),
            });
        }

        if self.logging.enabled && self.logging.max_rotated_files == 0 {
            return Err(DpcError::InvalidConfig {
                details: "logging.max_rotated_files must be >= 1 when logging is enabled"
                    .to_string(),
            });
        }

        Ok(())
    }
}

fn set_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_u64(name, &raw)?;
    }
    Ok(())
}

fn set_usize<F>(lookup: &mut F, name: &str, slot: &mut usize) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .parse::<usize>()
            .map_err(|error| DpcError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}

fn set_bool<F>(lookup: &mut F, name: &str, slot: &mut bool) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.parse::<bool>().map_err(|error| DpcError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn parse_u64(name: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|error| DpcError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
