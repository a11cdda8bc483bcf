#![forbid(unsafe_code)]

//! Device Panel Cache (dpc): the data layer of a multi-panel device dashboard.
//!
//! Four pieces work together:
//! 1. **Stale-while-revalidate cache**: per-key entries with per-kind TTLs,
//!    served immediately even when stale while a refresh runs behind them
//! 2. **Single-flight refresh coordination**: at most one fetch per key, with
//!    generation-tagged tickets so late results never clobber newer state
//! 3. **Cooperative event loop**: one thread owns the model and the cache;
//!    device I/O runs on a worker pool and a bounded fan-out
//! 4. **Panel controllers**: loading/ready/refreshing/errored phases, a
//!    viewport scroller, and focus-cycling edit forms
//!
//! # Library usage
//!
//! ```rust,no_run
//! use device_panel_cache::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use device_panel_cache::core::config::Config;
//! use device_panel_cache::refresh::coordinator::RefreshCoordinator;
//! ```

pub mod prelude;

pub mod cache;
pub mod core;
pub mod logger;
pub mod refresh;
pub mod tui;
