//! Long-running control-plane services.

pub mod reconciler;

pub use reconciler::{PassReport, ReconcileError, Reconciler};
