//! SQLite implementation of the topology store.

mod gc;
mod read;
mod topology_store;

pub use topology_store::SqliteTopologyStore;

#[cfg(test)]
mod tests;
