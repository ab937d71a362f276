//! # Gavel Store
//!
//! Persistence and event gateway for the Gavel governance engine.
//!
//! ## Overview
//!
//! The deliberation queue and the approval chain engine keep no
//! authoritative state in memory. Every transition is written through a
//! [`RecordStore`] before it is acknowledged, then announced on an
//! [`EventSink`]. Publishing is best-effort: a failed publish is retried
//! in the background and never undoes a committed write.
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`RecordStore`] | Key-value persistence contract |
//! | [`SledStore`] | Embedded sled implementation with TTL envelopes |
//! | [`BroadcastBus`] | In-process publish/subscribe sink |
//! | [`EventPublisher`] | Retrying, non-blocking publisher |
//! | [`ShardedLocks`] | Per-id serialization of transitions |
//!
//! ## Usage
//!
//! ```rust
//! use gavel_store::{Keyspace, RecordStoreExt, SledStore};
//!
//! let store = SledStore::temporary().unwrap();
//! store.put_json(Keyspace::Approvals, "req-1", &"payload").unwrap();
//!
//! let loaded: Option<String> = store.get_json(Keyspace::Approvals, "req-1").unwrap();
//! assert_eq!(loaded.as_deref(), Some("payload"));
//! ```
//!
//! ## References
//!
//! - Sled documentation: <https://sled.rs/>

mod error;
mod events;
mod locks;
mod storage;

pub use error::{PublishError, Result, StoreError};
pub use events::{
    BroadcastBus, EventKind, EventPublisher, EventSink, LifecycleEvent, RetryPolicy,
};
pub use locks::{ShardedLocks, DEFAULT_SHARDS};
pub use storage::{Keyspace, RecordStore, RecordStoreExt, SledStore, WriteOp};
