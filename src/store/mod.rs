//! Durable storage for graph snapshots and archived workflow sessions.
//!
//! [`DurableStore`] keeps everything in one redb database. Each replace is a
//! single ACID write transaction, so a crash never leaves a partial snapshot
//! visible.

pub mod durable;

pub use durable::DurableStore;

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
