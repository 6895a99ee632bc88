//! Identifier-indexed record stores.
//!
//! A [`KeyedStore`] owns the latest known record per identifier for one
//! record type. It is seeded from REST snapshots, kept current by the
//! live feed, and read by any number of consumers through [`get`],
//! [`query`] and [`all`]. Every mutation is published on a
//! [`broadcast`] channel so reactive consumers observe each write, even
//! one that replaces a record with an identical value.
//!
//! # Ordering
//!
//! Under [`OrderingPolicy::ArrivalOrder`] the most recently processed
//! write wins, whether it came from a snapshot or the feed. Under
//! [`OrderingPolicy::Versioned`] writes carrying a source-of-truth
//! version older than the stored record are rejected, and deletes made
//! while a snapshot is loading leave a tombstone so a snapshot racing
//! behind a feed delete cannot resurrect the record. Tombstones are
//! dropped once the last pending snapshot has settled.
//!
//! [`get`]: KeyedStore::get
//! [`query`]: KeyedStore::query
//! [`all`]: KeyedStore::all

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use lookout_types::{ChangeRecord, Command, EntityType, KeyField, Record, RecordKey};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::SyncError;

/// Capacity of each store's change notification channel.
///
/// A subscriber falling further behind receives
/// [`broadcast::error::RecvError::Lagged`] and should re-read the store.
const EVENT_CAPACITY: usize = 1024;

/// How a store resolves concurrent writes to the same identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderingPolicy {
    /// The most recently processed write wins.
    #[default]
    ArrivalOrder,
    /// Writes older than the stored record (by [`Record::version`]) are
    /// rejected; records without a version fall back to arrival order.
    Versioned,
}

/// What a write did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new identifier was added.
    Inserted,
    /// An existing record was replaced.
    Updated,
    /// A record was removed.
    Deleted,
    /// A delete targeted an identifier that was not present.
    Absent,
    /// A versioned write was older than the stored state and was ignored.
    Stale,
    /// The write was malformed or had an unknown command and was dropped.
    Dropped,
}

impl WriteOutcome {
    /// Whether the write changed the store.
    pub const fn changed(self) -> bool {
        matches!(self, Self::Inserted | Self::Updated | Self::Deleted)
    }
}

/// A change notification published by a store.
#[derive(Debug, Clone)]
pub enum StoreEvent<R> {
    /// A record was added under a new identifier.
    Inserted {
        /// The record identifier.
        key: RecordKey,
        /// The stored record.
        record: Arc<R>,
        /// Store revision after the write.
        revision: u64,
    },
    /// A record replaced the previous record for its identifier.
    Updated {
        /// The record identifier.
        key: RecordKey,
        /// The stored record.
        record: Arc<R>,
        /// Store revision after the write.
        revision: u64,
    },
    /// The record for an identifier was removed.
    Deleted {
        /// The record identifier.
        key: RecordKey,
        /// Store revision after the write.
        revision: u64,
    },
}

impl<R> StoreEvent<R> {
    /// The identifier the event refers to.
    pub const fn key(&self) -> &RecordKey {
        match self {
            Self::Inserted { key, .. } | Self::Updated { key, .. } | Self::Deleted { key, .. } => {
                key
            }
        }
    }

    /// The store revision after the write.
    pub const fn revision(&self) -> u64 {
        match self {
            Self::Inserted { revision, .. }
            | Self::Updated { revision, .. }
            | Self::Deleted { revision, .. } => *revision,
        }
    }

    /// The written record, `None` for deletes.
    pub const fn record(&self) -> Option<&Arc<R>> {
        match self {
            Self::Inserted { record, .. } | Self::Updated { record, .. } => Some(record),
            Self::Deleted { .. } => None,
        }
    }
}

/// Lock-protected contents of a store.
struct Contents<R> {
    records: BTreeMap<RecordKey, Arc<R>>,
    tombstones: BTreeMap<RecordKey, DateTime<Utc>>,
    snapshots_pending: usize,
    revision: u64,
}

/// An identifier-indexed collection of records of one type.
///
/// Bound to exactly one [`KeyField`] at construction. Shared via
/// [`Arc`]; all methods take `&self`.
pub struct KeyedStore<R: Record> {
    name: &'static str,
    key: KeyField<R>,
    policy: OrderingPolicy,
    contents: RwLock<Contents<R>>,
    events: broadcast::Sender<StoreEvent<R>>,
}

impl<R: Record> KeyedStore<R> {
    /// Create an empty store with arrival-order writes.
    pub fn new(name: &'static str, key: KeyField<R>) -> Self {
        Self::with_policy(name, key, OrderingPolicy::ArrivalOrder)
    }

    /// Create an empty store with the given ordering policy.
    pub fn with_policy(name: &'static str, key: KeyField<R>, policy: OrderingPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name,
            key,
            policy,
            contents: RwLock::new(Contents {
                records: BTreeMap::new(),
                tombstones: BTreeMap::new(),
                snapshots_pending: 0,
                revision: 0,
            }),
            events,
        }
    }

    /// The store name used in logs.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The key binding of this store.
    pub const fn key_field(&self) -> &KeyField<R> {
        &self.key
    }

    /// The ordering policy of this store.
    pub const fn policy(&self) -> OrderingPolicy {
        self.policy
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent<R>> {
        self.events.subscribe()
    }

    /// Add a record under an identifier that is not yet present.
    ///
    /// Callers use this only after a failed lookup. If the identifier is
    /// present anyway, the record replaces it and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::EmptyKey`] if the record's identifier is empty.
    pub fn insert(&self, record: R) -> Result<WriteOutcome, SyncError> {
        let key = self.validated_key(&record)?;
        let mut contents = self.write();
        if contents.records.contains_key(&key) {
            warn!(store = self.name, %key, "insert of an existing identifier, replacing");
        }
        contents.tombstones.remove(&key);
        Ok(self.store(&mut contents, key, record))
    }

    /// Insert a record, or replace the stored record with the same
    /// identifier.
    ///
    /// Observers are notified with a fresh value even when the record is
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::EmptyKey`] if the record's identifier is empty.
    pub fn upsert(&self, record: R) -> Result<WriteOutcome, SyncError> {
        let key = self.validated_key(&record)?;
        let mut contents = self.write();
        if self.is_stale(&contents, &key, &record) {
            debug!(store = self.name, %key, "ignoring stale write");
            return Ok(WriteOutcome::Stale);
        }
        contents.tombstones.remove(&key);
        Ok(self.store(&mut contents, key, record))
    }

    /// Remove the record for `key`. Removing an absent identifier is a
    /// no-op.
    pub fn delete(&self, key: &RecordKey) -> WriteOutcome {
        let mut contents = self.write();
        let Some(removed) = contents.records.remove(key) else {
            return WriteOutcome::Absent;
        };
        let keep_tombstone =
            self.policy == OrderingPolicy::Versioned && contents.snapshots_pending > 0;
        if let Some(version) = removed.version().filter(|_| keep_tombstone) {
            contents.tombstones.insert(key.clone(), version);
        }
        let revision = Self::bump(&mut contents);
        self.publish(StoreEvent::Deleted {
            key: key.clone(),
            revision,
        });
        WriteOutcome::Deleted
    }

    /// The current record for `key`, or `None` if there is none.
    pub fn get(&self, key: &RecordKey) -> Option<Arc<R>> {
        self.read().records.get(key).cloned()
    }

    /// Whether a record is stored for `key`.
    pub fn contains(&self, key: &RecordKey) -> bool {
        self.read().records.contains_key(key)
    }

    /// All records currently satisfying `predicate`, in identifier order.
    ///
    /// Evaluated eagerly over the present contents.
    pub fn query<F>(&self, predicate: F) -> Vec<Arc<R>>
    where
        F: Fn(&R) -> bool,
    {
        self.read()
            .records
            .values()
            .filter(|record| predicate(&***record))
            .cloned()
            .collect()
    }

    /// All records whose JSON field `field` equals `value`.
    pub fn query_field(&self, field: &str, value: &Value) -> Vec<Arc<R>> {
        self.query(|record| {
            serde_json::to_value(record)
                .ok()
                .and_then(|json| json.get(field).cloned())
                .is_some_and(|found| &found == value)
        })
    }

    /// Every stored record, in identifier order.
    pub fn all(&self) -> Vec<Arc<R>> {
        self.read().records.values().cloned().collect()
    }

    /// Every stored identifier, in order.
    pub fn keys(&self) -> Vec<RecordKey> {
        self.read().records.keys().cloned().collect()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    /// Monotonic counter bumped by every mutation.
    pub fn revision(&self) -> u64 {
        self.read().revision
    }

    /// Apply one change-feed record.
    ///
    /// `save` upserts the decoded record, `delete` removes the identifier
    /// found in the payload. Undecodable payloads and unknown commands are
    /// logged and dropped.
    pub fn apply(&self, change: &ChangeRecord) -> WriteOutcome {
        match change.command() {
            Some(Command::Save) => match serde_json::from_value::<R>(change.data.clone()) {
                Ok(record) => self.upsert(record).unwrap_or_else(|e| {
                    warn!(store = self.name, error = %e, "dropping save");
                    WriteOutcome::Dropped
                }),
                Err(e) => {
                    warn!(store = self.name, error = %e, "dropping undecodable save");
                    WriteOutcome::Dropped
                }
            },
            Some(Command::Delete) => match self.key.key_in(&change.data) {
                Some(key) => self.delete(&key),
                None => {
                    warn!(
                        store = self.name,
                        key = %self.key.describe(),
                        "dropping delete without identifier"
                    );
                    WriteOutcome::Dropped
                }
            },
            None => {
                warn!(
                    store = self.name,
                    command = %change.command,
                    entity = %change.entity,
                    "dropping change with unknown command"
                );
                WriteOutcome::Dropped
            }
        }
    }

    /// Mark a snapshot of this store as in flight.
    ///
    /// While any snapshot is pending, versioned deletes leave tombstones.
    pub fn begin_snapshot(&self) {
        let mut contents = self.write();
        contents.snapshots_pending = contents.snapshots_pending.saturating_add(1);
    }

    /// Mark a pending snapshot as settled, applied or failed.
    ///
    /// When none remain pending the tombstones are dropped. Returns the
    /// number dropped.
    pub fn end_snapshot(&self) -> usize {
        let mut contents = self.write();
        let Some(pending) = contents.snapshots_pending.checked_sub(1) else {
            warn!(store = self.name, "snapshot ended without one pending, ignoring");
            return 0;
        };
        contents.snapshots_pending = pending;
        if pending > 0 {
            return 0;
        }
        let pruned = contents.tombstones.len();
        contents.tombstones.clear();
        if pruned > 0 {
            debug!(store = self.name, pruned, "tombstones dropped");
        }
        pruned
    }

    /// Number of tombstones currently held.
    pub fn tombstone_count(&self) -> usize {
        self.read().tombstones.len()
    }

    /// Upsert every element of a snapshot. Elements that fail to decode are
    /// logged and skipped.
    ///
    /// Returns the number of elements applied.
    pub fn seed(&self, values: Vec<Value>) -> usize {
        let mut applied: usize = 0;
        for value in values {
            let outcome = serde_json::from_value::<R>(value)
                .map_err(SyncError::from)
                .and_then(|record| self.upsert(record));
            match outcome {
                Ok(WriteOutcome::Stale) => {}
                Ok(_) => applied = applied.saturating_add(1),
                Err(e) => warn!(store = self.name, error = %e, "skipping snapshot element"),
            }
        }
        applied
    }

    fn validated_key(&self, record: &R) -> Result<RecordKey, SyncError> {
        let key = self.key.key_of(record);
        if key.is_empty() {
            return Err(SyncError::EmptyKey {
                key: self.key.describe(),
            });
        }
        Ok(key)
    }

    fn is_stale(&self, contents: &Contents<R>, key: &RecordKey, incoming: &R) -> bool {
        if self.policy != OrderingPolicy::Versioned {
            return false;
        }
        let Some(version) = incoming.version() else {
            return false;
        };
        if let Some(stored) = contents.records.get(key) {
            return stored.version().is_some_and(|current| version < current);
        }
        contents
            .tombstones
            .get(key)
            .is_some_and(|deleted| version <= *deleted)
    }

    fn store(&self, contents: &mut Contents<R>, key: RecordKey, record: R) -> WriteOutcome {
        let record = Arc::new(record);
        let replaced = contents
            .records
            .insert(key.clone(), Arc::clone(&record))
            .is_some();
        let revision = Self::bump(contents);
        if replaced {
            self.publish(StoreEvent::Updated {
                key,
                record,
                revision,
            });
            WriteOutcome::Updated
        } else {
            self.publish(StoreEvent::Inserted {
                key,
                record,
                revision,
            });
            WriteOutcome::Inserted
        }
    }

    fn bump(contents: &mut Contents<R>) -> u64 {
        contents.revision = contents.revision.saturating_add(1);
        contents.revision
    }

    fn publish(&self, event: StoreEvent<R>) {
        // send fails only when nobody is subscribed, which is normal.
        let receivers = self.events.send(event).unwrap_or(0);
        debug!(store = self.name, receivers, "store change published");
    }

    fn read(&self) -> RwLockReadGuard<'_, Contents<R>> {
        self.contents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Contents<R>> {
        self.contents.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: Record> core::fmt::Debug for KeyedStore<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyedStore")
            .field("name", &self.name)
            .field("key", &self.key.describe())
            .field("policy", &self.policy)
            .field("len", &self.len())
            .finish()
    }
}

/// Type-erased view of a [`KeyedStore`] used by the feed and snapshot
/// dispatchers, which route untyped JSON to stores of many record types.
pub trait EntitySink: Send + Sync {
    /// The entity type the sink stores.
    fn entity(&self) -> EntityType;

    /// The sink name used in logs.
    fn name(&self) -> &str;

    /// The key fields the sink indexes by, e.g. `check_id+node_id`.
    fn key_description(&self) -> String;

    /// Apply one change-feed record.
    fn apply_change(&self, change: &ChangeRecord) -> WriteOutcome;

    /// Upsert every element of a snapshot; returns the number applied.
    fn seed_records(&self, values: Vec<Value>) -> usize;

    /// Mark a snapshot of this sink as in flight.
    fn begin_snapshot(&self);

    /// Mark a pending snapshot as settled.
    fn end_snapshot(&self);
}

impl<R: Record> EntitySink for KeyedStore<R> {
    fn entity(&self) -> EntityType {
        R::ENTITY
    }

    fn name(&self) -> &str {
        self.name
    }

    fn key_description(&self) -> String {
        self.key.describe()
    }

    fn apply_change(&self, change: &ChangeRecord) -> WriteOutcome {
        self.apply(change)
    }

    fn seed_records(&self, values: Vec<Value>) -> usize {
        self.seed(values)
    }

    fn begin_snapshot(&self) {
        Self::begin_snapshot(self);
    }

    fn end_snapshot(&self) {
        Self::end_snapshot(self);
    }
}
