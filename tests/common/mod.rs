#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use device_panel_cache::cache::{DataKind, Payload, SubjectId};
use device_panel_cache::core::errors::FetchError;
use device_panel_cache::refresh::fetcher::{FetchContext, FetchResult, Fetcher, Mutation};
use parking_lot::Mutex;
use serde_json::json;

// ──────────────────── fetcher ────────────────────

/// Fetcher that counts calls per key, sleeps a fixed latency, and fails for
/// subjects listed as offline.
pub struct CountingFetcher {
    latency: Duration,
    offline: Vec<String>,
    calls: Mutex<HashMap<(String, DataKind), u64>>,
    total: AtomicU64,
}

impl CountingFetcher {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            offline: Vec::new(),
            calls: Mutex::new(HashMap::new()),
            total: AtomicU64::new(0),
        }
    }

    pub fn offline(mut self, subject: &str) -> Self {
        self.offline.push(subject.to_string());
        self
    }

    pub fn calls(&self, subject: &str, kind: DataKind) -> u64 {
        self.calls
            .lock()
            .get(&(subject.to_string(), kind))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}

impl Fetcher for CountingFetcher {
    fn fetch(&self, ctx: &FetchContext, subject: &SubjectId, kind: DataKind) -> FetchResult {
        let n = {
            let mut calls = self.calls.lock();
            let n = calls.entry((subject.to_string(), kind)).or_insert(0);
            *n += 1;
            *n
        };
        self.total.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.latency.min(ctx.remaining()));
        if self.offline.iter().any(|s| s == subject.as_str()) {
            return Err(FetchError::Unreachable {
                details: format!("{subject} is offline"),
            });
        }
        Ok(Payload::new(json!({ "subject": subject.as_str(), "kind": kind.as_str(), "call": n })))
    }

    fn mutate(&self, _ctx: &FetchContext, _mutation: &Mutation) -> Result<(), FetchError> {
        Ok(())
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// ──────────────────── cli ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_dpc") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "dpc.exe" } else { "dpc" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve dpc binary path for integration test"),
    }
}

/// Run the `dpc` binary with `home` as `$HOME`, so config, cache and
/// diagnostics all land in a scratch directory. Output is also written to a
/// per-case log file for post-mortems.
pub fn run_cli_case(case_name: &str, home: &Path, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("dpc-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", home)
        .env_remove("DPC_OUTPUT_FORMAT")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute dpc command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
