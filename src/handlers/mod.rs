//! Worker-side RPC handlers.
//!
//! A worker pod exposes its declared topology over the Discovery RPC and its
//! live operations over the Watch RPC.

pub mod discovery;
pub mod watch;
pub mod worker;

pub use discovery::TopologyService;
pub use watch::{ObservabilityWatcher, WatchKey, WatchService};
pub use worker::{bind_worker, serve_worker};
