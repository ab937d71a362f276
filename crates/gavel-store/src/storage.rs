//! # Durable Record Storage
//!
//! This module provides the persistence boundary for Gavel. Every engine
//! transition is written through a [`RecordStore`] before it is
//! acknowledged, so the store (not process memory) is the single source
//! of truth for approval requests and deliberation items.
//!
//! ## Storage Structure
//!
//! Records are grouped into keyspaces. The sled implementation maps each
//! keyspace to its own tree:
//!
//! | Keyspace | Key | Value |
//! |----------|-----|-------|
//! | `approvals` | request id | serialized approval request |
//! | `deliberations` | item id | serialized deliberation item |
//! | `deliberations` | `{item id}/votes/{agent id}` | serialized agent vote |
//!
//! Votes share the item's keyspace so that a vote upsert and the item's
//! status update commit in a single atomic batch.
//!
//! ## Expiry
//!
//! Sled has no native TTL. Each value is wrapped in an envelope whose
//! first 8 bytes hold the big-endian expiry instant in unix milliseconds
//! (`0` means the record never expires). Expired records read as absent,
//! are removed lazily on access, and can be swept with
//! [`SledStore::purge_expired`].

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Size of the expiry header prepended to every stored value.
const ENVELOPE_HEADER: usize = 8;

/// Logical namespaces inside the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyspace {
    /// Approval chain requests.
    Approvals,
    /// Deliberation items and their votes.
    Deliberations,
}

impl Keyspace {
    /// All keyspaces, in a stable order.
    pub const ALL: [Keyspace; 2] = [Keyspace::Approvals, Keyspace::Deliberations];

    /// Name of the backing tree.
    pub fn tree_name(&self) -> &'static str {
        match self {
            Keyspace::Approvals => "approvals",
            Keyspace::Deliberations => "deliberations",
        }
    }
}

/// A single write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or overwrite a record.
    Put { key: String, value: Vec<u8> },
    /// Delete a record if present.
    Remove { key: String },
}

impl WriteOp {
    /// Builds a put of the JSON encoding of `value`.
    pub fn put_json<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self> {
        Ok(WriteOp::Put {
            key: key.into(),
            value: serde_json::to_vec(value)?,
        })
    }
}

/// Key-value persistence contract required by the engine.
///
/// Implementations must be safe to share between tasks. A failed call must
/// leave the store unchanged; `apply` is all-or-nothing.
pub trait RecordStore: Send + Sync {
    /// Reads a record.
    fn get(&self, space: Keyspace, key: &str) -> Result<Option<Vec<u8>>>;

    /// Inserts or overwrites a record.
    fn put(&self, space: Keyspace, key: &str, value: Vec<u8>) -> Result<()>;

    /// Deletes a record. Returns true if it existed.
    fn remove(&self, space: Keyspace, key: &str) -> Result<bool>;

    /// Returns every live record whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, space: Keyspace, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Applies a batch of writes atomically.
    fn apply(&self, space: Keyspace, ops: Vec<WriteOp>) -> Result<()>;

    /// Makes every preceding write durable. Callers acknowledge a
    /// transition only after this returns.
    fn sync(&self) -> Result<()>;
}

/// Typed JSON helpers over any [`RecordStore`].
pub trait RecordStoreExt: RecordStore {
    /// Reads and decodes a record.
    fn get_json<T: DeserializeOwned>(&self, space: Keyspace, key: &str) -> Result<Option<T>> {
        match self.get(space, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encodes and writes a record.
    fn put_json<T: Serialize>(&self, space: Keyspace, key: &str, value: &T) -> Result<()> {
        self.put(space, key, serde_json::to_vec(value)?)
    }

    /// Decodes every record under `prefix`.
    fn scan_json<T: DeserializeOwned>(
        &self,
        space: Keyspace,
        prefix: &str,
    ) -> Result<Vec<(String, T)>> {
        self.scan_prefix(space, prefix)?
            .into_iter()
            .map(|(key, bytes)| Ok((key, serde_json::from_slice(&bytes)?)))
            .collect()
    }
}

impl<S: RecordStore + ?Sized> RecordStoreExt for S {}

/// Sled-backed [`RecordStore`] with per-record expiry.
///
/// # Thread Safety
///
/// Sled is internally synchronized; a `SledStore` can be cloned and shared
/// freely between tasks.
///
/// # Example
///
/// ```rust
/// use gavel_store::{Keyspace, RecordStore, SledStore};
///
/// let store = SledStore::temporary().unwrap();
/// store.put(Keyspace::Approvals, "req-1", b"{}".to_vec()).unwrap();
/// assert!(store.get(Keyspace::Approvals, "req-1").unwrap().is_some());
/// ```
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    approvals: sled::Tree,
    deliberations: sled::Tree,
    ttl: Option<Duration>,
    durable: bool,
}

impl SledStore {
    /// Opens or creates a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the path is invalid, locked by
    /// another process, or the database is corrupted.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Creates an in-memory store that is discarded on drop.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let approvals = db.open_tree(Keyspace::Approvals.tree_name())?;
        let deliberations = db.open_tree(Keyspace::Deliberations.tree_name())?;
        Ok(SledStore {
            db,
            approvals,
            deliberations,
            ttl: None,
            durable: true,
        })
    }

    /// Sets the time-to-live applied to every subsequent write.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Returns the configured time-to-live.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Controls whether `sync` flushes to disk. On by default; when off,
    /// sled's background flusher alone persists writes.
    #[must_use]
    pub fn with_durable_writes(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Returns true if `sync` flushes to disk.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    fn tree(&self, space: Keyspace) -> &sled::Tree {
        match space {
            Keyspace::Approvals => &self.approvals,
            Keyspace::Deliberations => &self.deliberations,
        }
    }

    fn expiry_millis(&self) -> u64 {
        match self.ttl {
            Some(ttl) => {
                let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
                now_millis().saturating_add(ttl_ms)
            }
            None => 0,
        }
    }

    fn wrap(&self, payload: &[u8]) -> Vec<u8> {
        let mut value = Vec::with_capacity(ENVELOPE_HEADER + payload.len());
        value.extend_from_slice(&self.expiry_millis().to_be_bytes());
        value.extend_from_slice(payload);
        value
    }

    /// Removes every expired record in a keyspace. Returns the number removed.
    pub fn purge_expired(&self, space: Keyspace) -> Result<usize> {
        let tree = self.tree(space);
        let now = now_millis();
        let mut removed = 0;

        for entry in tree.iter() {
            let (key, value) = entry?;
            let (expiry, _) = unwrap_envelope(&key, &value)?;
            if is_expired(expiry, now) {
                tree.remove(&key)?;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(keyspace = space.tree_name(), removed, "purged expired records");
        }
        Ok(removed)
    }

    /// Number of records (live or not yet purged) in a keyspace.
    pub fn len(&self, space: Keyspace) -> usize {
        self.tree(space).len()
    }

    /// Returns true if the keyspace holds no records.
    pub fn is_empty(&self, space: Keyspace) -> bool {
        self.tree(space).is_empty()
    }

    /// Flushes pending writes to disk. Returns the number of bytes flushed.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }
}

impl RecordStore for SledStore {
    fn get(&self, space: Keyspace, key: &str) -> Result<Option<Vec<u8>>> {
        let tree = self.tree(space);
        let value = match tree.get(key.as_bytes())? {
            Some(value) => value,
            None => return Ok(None),
        };

        let (expiry, payload) = unwrap_envelope(key.as_bytes(), &value)?;
        if is_expired(expiry, now_millis()) {
            tree.remove(key.as_bytes())?;
            return Ok(None);
        }
        Ok(Some(payload.to_vec()))
    }

    fn put(&self, space: Keyspace, key: &str, value: Vec<u8>) -> Result<()> {
        self.tree(space).insert(key.as_bytes(), self.wrap(&value))?;
        Ok(())
    }

    fn remove(&self, space: Keyspace, key: &str) -> Result<bool> {
        Ok(self.tree(space).remove(key.as_bytes())?.is_some())
    }

    fn scan_prefix(&self, space: Keyspace, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let now = now_millis();
        let mut records = Vec::new();

        for entry in self.tree(space).scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry?;
            let (expiry, payload) = unwrap_envelope(&key, &value)?;
            if is_expired(expiry, now) {
                continue;
            }
            let key = String::from_utf8(key.to_vec())
                .map_err(|_| StoreError::Corrupt(String::from_utf8_lossy(&key).into_owned()))?;
            records.push((key, payload.to_vec()));
        }

        Ok(records)
    }

    fn apply(&self, space: Keyspace, ops: Vec<WriteOp>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for op in ops {
            match op {
                WriteOp::Put { key, value } => batch.insert(key.as_bytes(), self.wrap(&value)),
                WriteOp::Remove { key } => batch.remove(key.as_bytes()),
            }
        }
        self.tree(space).apply_batch(batch)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        if self.durable {
            self.db.flush()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("approvals", &self.approvals.len())
            .field("deliberations", &self.deliberations.len())
            .field("ttl", &self.ttl)
            .field("durable", &self.durable)
            .finish()
    }
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

fn is_expired(expiry: u64, now: u64) -> bool {
    expiry != 0 && expiry <= now
}

fn unwrap_envelope<'a>(key: &[u8], value: &'a [u8]) -> Result<(u64, &'a [u8])> {
    if value.len() < ENVELOPE_HEADER {
        return Err(StoreError::Corrupt(String::from_utf8_lossy(key).into_owned()));
    }
    let (header, payload) = value.split_at(ENVELOPE_HEADER);
    let mut expiry = [0u8; ENVELOPE_HEADER];
    expiry.copy_from_slice(header);
    Ok((u64::from_be_bytes(expiry), payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    fn record(name: &str, count: u32) -> Record {
        Record {
            name: name.to_string(),
            count,
        }
    }

    #[test]
    fn test_temporary_store_is_empty() {
        let store = SledStore::temporary().unwrap();
        assert!(store.is_empty(Keyspace::Approvals));
        assert!(store.is_empty(Keyspace::Deliberations));
    }

    #[test]
    fn test_put_and_get_json() {
        let store = SledStore::temporary().unwrap();
        store
            .put_json(Keyspace::Approvals, "req-1", &record("alpha", 1))
            .unwrap();

        let loaded: Record = store.get_json(Keyspace::Approvals, "req-1").unwrap().unwrap();
        assert_eq!(loaded, record("alpha", 1));
    }

    #[test]
    fn test_keyspaces_are_isolated() {
        let store = SledStore::temporary().unwrap();
        store.put(Keyspace::Approvals, "shared", b"a".to_vec()).unwrap();

        assert!(store.get(Keyspace::Deliberations, "shared").unwrap().is_none());
        assert_eq!(store.len(Keyspace::Approvals), 1);
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let store = SledStore::temporary().unwrap();
        store
            .put_json(Keyspace::Approvals, "req", &record("a", 1))
            .unwrap();
        store
            .put_json(Keyspace::Approvals, "req", &record("a", 2))
            .unwrap();

        let loaded: Record = store.get_json(Keyspace::Approvals, "req").unwrap().unwrap();
        assert_eq!(loaded.count, 2);
        assert_eq!(store.len(Keyspace::Approvals), 1);
    }

    #[test]
    fn test_remove() {
        let store = SledStore::temporary().unwrap();
        store.put(Keyspace::Approvals, "gone", b"x".to_vec()).unwrap();

        assert!(store.remove(Keyspace::Approvals, "gone").unwrap());
        assert!(!store.remove(Keyspace::Approvals, "gone").unwrap());
        assert!(store.get(Keyspace::Approvals, "gone").unwrap().is_none());
    }

    #[test]
    fn test_scan_prefix_returns_sub_keys_in_order() {
        let store = SledStore::temporary().unwrap();
        store.put(Keyspace::Deliberations, "item-1", b"i".to_vec()).unwrap();
        store
            .put(Keyspace::Deliberations, "item-1/votes/b", b"2".to_vec())
            .unwrap();
        store
            .put(Keyspace::Deliberations, "item-1/votes/a", b"1".to_vec())
            .unwrap();
        store
            .put(Keyspace::Deliberations, "item-2/votes/a", b"3".to_vec())
            .unwrap();

        let votes = store
            .scan_prefix(Keyspace::Deliberations, "item-1/votes/")
            .unwrap();
        let keys: Vec<&str> = votes.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["item-1/votes/a", "item-1/votes/b"]);
    }

    #[test]
    fn test_apply_batch_is_atomic_unit() {
        let store = SledStore::temporary().unwrap();
        store.put(Keyspace::Deliberations, "old", b"x".to_vec()).unwrap();

        store
            .apply(
                Keyspace::Deliberations,
                vec![
                    WriteOp::put_json("item", &record("item", 1)).unwrap(),
                    WriteOp::put_json("item/votes/agent", &record("vote", 1)).unwrap(),
                    WriteOp::Remove {
                        key: "old".to_string(),
                    },
                ],
            )
            .unwrap();

        assert!(store.get(Keyspace::Deliberations, "item").unwrap().is_some());
        assert!(store
            .get(Keyspace::Deliberations, "item/votes/agent")
            .unwrap()
            .is_some());
        assert!(store.get(Keyspace::Deliberations, "old").unwrap().is_none());
    }

    #[test]
    fn test_expired_records_read_as_absent() {
        let store = SledStore::temporary().unwrap().with_ttl(Duration::ZERO);
        store.put(Keyspace::Approvals, "short", b"x".to_vec()).unwrap();

        assert!(store.get(Keyspace::Approvals, "short").unwrap().is_none());
        assert!(store.scan_prefix(Keyspace::Approvals, "").unwrap().is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let store = SledStore::temporary().unwrap().with_ttl(Duration::ZERO);
        store.put(Keyspace::Approvals, "a", b"x".to_vec()).unwrap();
        store.put(Keyspace::Approvals, "b", b"y".to_vec()).unwrap();

        assert_eq!(store.purge_expired(Keyspace::Approvals).unwrap(), 2);
        assert!(store.is_empty(Keyspace::Approvals));
    }

    #[test]
    fn test_long_ttl_keeps_records() {
        let store = SledStore::temporary()
            .unwrap()
            .with_ttl(Duration::from_secs(30 * 24 * 3600));
        store.put(Keyspace::Approvals, "kept", b"x".to_vec()).unwrap();

        assert_eq!(store.purge_expired(Keyspace::Approvals).unwrap(), 0);
        assert_eq!(
            store.get(Keyspace::Approvals, "kept").unwrap(),
            Some(b"x".to_vec())
        );
    }

    #[test]
    fn test_corrupt_envelope_detected() {
        let store = SledStore::temporary().unwrap();
        store.approvals.insert("bad", &b"123"[..]).unwrap();

        let err = store.get(Keyspace::Approvals, "bad").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn test_envelope_roundtrip_header() {
        let (expiry, payload) = unwrap_envelope(b"k", &[0, 0, 0, 0, 0, 0, 0, 7, 42]).unwrap();
        assert_eq!(expiry, 7);
        assert_eq!(payload, &[42]);
    }

    #[test]
    fn test_writes_are_durable_by_default() {
        let store = SledStore::temporary().unwrap();
        assert!(store.is_durable());
        store.put(Keyspace::Approvals, "req-1", b"{}".to_vec()).unwrap();
        store.sync().unwrap();

        let relaxed = store.with_durable_writes(false);
        assert!(!relaxed.is_durable());
        relaxed.sync().unwrap();
    }
}
