//! Topomesh - control plane for a stream-processing mesh.
//!
//! Discovers which worker pods run parts of a declared topology, keeps a
//! normalized copy of that topology in a relational store, and lets observers
//! watch live operations of one processor instance across every pod that
//! serves it.

pub mod config;
pub mod discovery;
pub mod grpc;
pub mod handlers;
pub mod services;
pub mod storage;
pub mod subscription;
pub mod utils;
pub mod validation;

pub mod proto {
    tonic::include_proto!("topomesh");
}
