//! berth-state: embedded state store for Berth.
//!
//! Backed by [redb](https://docs.rs/redb), it stands in for the CRUD layer
//! that owns clusters, git branches, containers and cluster productions.
//! The orchestrator only sees it through the [`ClusterRepository`] trait.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Clusters are keyed by their globally unique namespace; containers use the
//! composite key `{namespace}:{container_id}` for prefix scans. Productions
//! are keyed by id with a secondary `namespace → id` index that enforces the
//! one-production-per-cluster invariant inside a single write transaction.

pub mod error;
pub mod repository;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use repository::ClusterRepository;
pub use store::StateStore;
pub use types::*;
