//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use device_panel_cache::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{DpcError, FetchError, Result};

// Cache
pub use crate::cache::{
    BackingStore, CacheKey, CacheStore, DataKind, Entry, Payload, StalenessPolicy, SubjectId,
    open_store,
};

// Refresh
pub use crate::refresh::{
    CacheEvent, FetchContext, FetchRequest, FetchResult, Fetcher, Mutation, RefreshCoordinator,
    SimulatedFetcher,
};

// Logger
pub use crate::logger::{DiagnosticEvent, DiagnosticsLogger, spawn_logger};

// Dashboard
pub use crate::tui::{
    CacheContext, DashboardMsg, DashboardSnapshot, EventLoop, PanelId, PanelPhase, PanelSource,
    PanelSpec, RenderSink, StopReason,
};
