//! Persistence layer for layer
//!
//! This crate provides:
//! - SQLite storage for gates and the request audit log
//! - An in-process LRU gate cache
//! - Per-gate analytics computed from the audit log

pub mod cache;
pub mod sqlite;

// Re-export main types
pub use cache::LruGateCache;
pub use sqlite::{GateAnalytics, SqliteStore};
