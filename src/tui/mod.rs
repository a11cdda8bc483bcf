//! Dashboard state machine: panels over the cache, the Elm-style
//! model/update pair, key routing, and the event loop that owns them.

#![allow(missing_docs)]

pub mod focus;
pub mod form;
pub mod input;
pub mod model;
pub mod panel;
pub mod runtime;
pub mod scroller;
pub mod snapshot;
pub mod terminal_guard;
pub mod update;

#[cfg(test)]
mod test_properties;
#[cfg(test)]
mod test_scenario_drills;

pub use model::{DashboardCmd, DashboardModel, DashboardMsg, PanelSpec};
pub use panel::{CacheContext, PanelController, PanelId, PanelPhase, PanelSource};
pub use runtime::{EventLoop, StopReason};
pub use snapshot::{DashboardSnapshot, PanelSnapshot, RenderSink, render_text};
