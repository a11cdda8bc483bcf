//! Background refresh: the fetcher seam, single-flight coordination, and the
//! worker threads that run fetches off the event loop.

pub mod coordinator;
pub mod fanout;
pub mod fetcher;
pub mod pool;
pub mod simulated;

pub use coordinator::{
    CacheEvent, CompletionOutcome, FetchCompletion, FetchRequest, LoadDecision,
    RefreshCoordinator, RefreshTicket, Route, TicketMode,
};
pub use fetcher::{FetchContext, FetchResult, Fetcher, Mutation};
pub use pool::{FetchJob, FetchPool, PoolReply};
pub use simulated::SimulatedFetcher;
