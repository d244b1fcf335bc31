//! Storage Module
//!
//! The keyspace shared by every connection worker, plus the value and expiry
//! types it stores.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Keyspace                             │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Sharded Storage**: 64 independent shards reduce lock contention
//! - **Typed Values**: text, integers and raw blobs
//! - **Lazy Expiry**: Expired keys are evicted when they are next touched
//! - **Consistent Snapshots**: scans lock every shard for their duration
//!
//! ## Example
//!
//! ```
//! use snapkv::storage::{Expiry, Keyspace, Value};
//! use std::time::Duration;
//!
//! let keyspace = Keyspace::new();
//!
//! keyspace.set("name".to_string(), Value::from("alice"), None);
//! assert_eq!(keyspace.get("name"), Some(Value::from("alice")));
//!
//! keyspace.set(
//!     "session".to_string(),
//!     Value::from("token123"),
//!     Some(Expiry::after(Duration::from_secs(3600))),
//! );
//! ```

pub mod engine;
pub mod value;

pub use engine::{Keyspace, KeyspaceSnapshot, StorageStats};
pub use value::{Entry, Expiry, TimeUnit, Value};
