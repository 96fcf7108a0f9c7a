//! Versioned in-memory key-value state with last-writer-wins resolution.
//!
//! Each node owns one [`StateStore`]. It keeps two tables:
//!
//! - the **version table**, the last accepted [`Record`] per key, used only to
//!   decide whether an incoming record is newer than what we have;
//! - the **materialized map**, the decoded values currently visible to `get`.
//!
//! A DELETE removes the value but keeps the version-table entry, so a stale SET
//! arriving later is still recognised and dropped.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::codec::{BincodeCodec, Codec, Key, Value};
use crate::config::DEFAULT_MAX_DATAGRAM_SIZE;
use crate::error::{Error, Result};
use crate::record::{Operation, Record};

/// Result of applying a record received from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedOutcome {
    /// SET accepted; the value is now visible.
    Applied,
    /// DELETE accepted and the key was removed.
    Deleted,
    /// A record with a higher sequence number is already stored.
    StaleOutOfOrder,
    /// DELETE accepted for a key we held no value for, most likely because the
    /// SET that created it was lost.
    DeleteOfUnknownKey,
}

/// Both tables live behind one lock so the local write path and the network
/// receive path can never interleave halfway through a record.
struct Tables<K, V> {
    states: HashMap<K, Record>,
    data: HashMap<K, V>,
}

impl<K, V> Default for Tables<K, V> {
    fn default() -> Self {
        Self {
            states: HashMap::new(),
            data: HashMap::new(),
        }
    }
}

/// Thread-safe replicated state for one node.
///
/// Encoding and decoding happen outside the lock; the critical section is
/// limited to the map lookups and inserts.
pub struct StateStore<K, V, C = BincodeCodec> {
    codec: C,
    max_record_len: usize,
    tables: Mutex<Tables<K, V>>,
}

impl<K: Key, V: Value> StateStore<K, V> {
    /// Empty store using the bincode codec.
    pub fn new() -> Self {
        Self::with_codec(BincodeCodec)
    }
}

impl<K: Key, V: Value> Default for StateStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key, V: Value, C: Codec> StateStore<K, V, C> {
    pub fn with_codec(codec: C) -> Self {
        Self {
            codec,
            max_record_len: DEFAULT_MAX_DATAGRAM_SIZE,
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Caps the encoded size of records produced by `set` and `delete`.
    pub fn with_max_record_len(mut self, max_record_len: usize) -> Self {
        self.max_record_len = max_record_len;
        self
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Returns the currently visible value for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.tables.lock().data.get(key).cloned()
    }

    pub fn get_or(&self, key: &K, default: V) -> V {
        self.get(key).unwrap_or(default)
    }

    /// Returns the last accepted record for `key`, including DELETE tombstones.
    pub fn version(&self, key: &K) -> Option<Record> {
        self.tables.lock().states.get(key).cloned()
    }

    /// Number of keys with a visible value; tombstones are not counted.
    pub fn len(&self) -> usize {
        self.tables.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.lock().data.is_empty()
    }

    /// Clones the materialized map.
    pub fn snapshot(&self) -> HashMap<K, V> {
        self.tables.lock().data.clone()
    }

    /// Writes a value locally and returns the record to forward to peers.
    ///
    /// The local node is authoritative for its own sequence numbers, so this
    /// never loses to the version table: it takes the stored seq plus one, or 1
    /// for a key never seen before.
    ///
    /// # Errors
    /// - [`Error::PayloadTooLarge`] if the record would not fit in one datagram.
    ///   Nothing is stored in that case.
    /// - [`Error::Codec`] if the key or value cannot be encoded.
    /// - [`Error::SequenceExhausted`] if the stored version already carries
    ///   `u64::MAX`. Nothing is stored.
    pub fn set(&self, key: K, value: V) -> Result<Record> {
        let key_bytes = self.codec.encode(&key)?;
        let payload = self.codec.encode(&value)?;

        let mut tables = self.tables.lock();
        let record = Record::set(key_bytes, next_seq(&tables.states, &key)?, payload);
        self.check_len(&record)?;

        tables.states.insert(key.clone(), record.clone());
        tables.data.insert(key, value);
        Ok(record)
    }

    /// Deletes a value locally and returns the DELETE record to forward.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if this node holds no value for `key`. No record is
    ///   produced and the version table is left alone.
    /// - [`Error::SequenceExhausted`] if the stored version already carries
    ///   `u64::MAX`.
    pub fn delete(&self, key: &K) -> Result<Record> {
        let key_bytes = self.codec.encode(key)?;

        let mut tables = self.tables.lock();
        if !tables.data.contains_key(key) {
            return Err(Error::NotFound);
        }
        let record = Record::delete(key_bytes, next_seq(&tables.states, key)?);
        self.check_len(&record)?;

        tables.states.insert(key.clone(), record.clone());
        tables.data.remove(key);
        Ok(record)
    }

    /// Applies a record received from a peer.
    ///
    /// The record is rejected only when the stored version is *strictly* newer.
    /// A record carrying the same seq as the stored one is applied again.
    ///
    /// # Errors
    /// Fails when the key, the operation or the SET payload cannot be decoded.
    /// Both tables are untouched in that case.
    pub fn apply(&self, record: Record) -> Result<AppliedOutcome> {
        let key: K = self.codec.decode(&record.key)?;
        let value: Option<V> = match record.operation()? {
            Operation::Set => Some(self.codec.decode(&record.payload)?),
            Operation::Delete => None,
        };

        let mut tables = self.tables.lock();
        if let Some(current) = tables.states.get(&key) {
            if current.seq > record.seq {
                return Ok(AppliedOutcome::StaleOutOfOrder);
            }
        }
        tables.states.insert(key.clone(), record);

        let outcome = match value {
            Some(value) => {
                tables.data.insert(key, value);
                AppliedOutcome::Applied
            }
            None if tables.data.remove(&key).is_some() => AppliedOutcome::Deleted,
            None => AppliedOutcome::DeleteOfUnknownKey,
        };
        Ok(outcome)
    }

    fn check_len(&self, record: &Record) -> Result<()> {
        use prost::Message;

        let size = record.encoded_len();
        if size > self.max_record_len {
            return Err(Error::PayloadTooLarge {
                size,
                limit: self.max_record_len,
            });
        }
        Ok(())
    }
}

fn next_seq<K: Key>(states: &HashMap<K, Record>, key: &K) -> Result<u64> {
    match states.get(key) {
        Some(current) => current.seq.checked_add(1).ok_or(Error::SequenceExhausted),
        None => Ok(1),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use super::*;
    use crate::codec::JsonCodec;

    fn remote_set(store: &StateStore<String, i64>, key: &str, seq: u64, value: i64) -> Record {
        let codec = store.codec();
        Record::set(
            codec.encode(key).unwrap(),
            seq,
            codec.encode(&value).unwrap(),
        )
    }

    fn remote_delete(store: &StateStore<String, i64>, key: &str, seq: u64) -> Record {
        Record::delete(store.codec().encode(key).unwrap(), seq)
    }

    #[test]
    fn local_sequence_starts_at_one_and_is_per_key() {
        let store: StateStore<String, i64> = StateStore::new();

        let seqs: Vec<(String, u64)> = [("a", 1), ("b", 2), ("a", 3), ("a", 4), ("b", 5)]
            .into_iter()
            .map(|(key, value)| {
                let record = store.set(key.to_string(), value).unwrap();
                (key.to_string(), record.seq)
            })
            .collect();

        assert_eq!(
            seqs,
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 1),
                ("a".to_string(), 2),
                ("a".to_string(), 3),
                ("b".to_string(), 2),
            ]
        );
        assert_eq!(store.get(&"a".to_string()), Some(4));
        assert_eq!(store.get(&"b".to_string()), Some(5));
    }

    #[test]
    fn local_write_continues_from_remote_version() {
        let store: StateStore<String, i64> = StateStore::new();
        store.apply(remote_set(&store, "x", 41, 1)).unwrap();

        let record = store.set("x".to_string(), 2).unwrap();
        assert_eq!(record.seq, 42);
    }

    #[test]
    fn local_write_after_max_sequence_is_refused() {
        let store: StateStore<String, i64> = StateStore::new();
        store.apply(remote_set(&store, "x", u64::MAX, 1)).unwrap();

        assert!(matches!(
            store.set("x".to_string(), 2),
            Err(Error::SequenceExhausted)
        ));
        assert!(matches!(
            store.delete(&"x".to_string()),
            Err(Error::SequenceExhausted)
        ));
        assert_eq!(store.get(&"x".to_string()), Some(1));
        assert_eq!(store.version(&"x".to_string()).unwrap().seq, u64::MAX);
    }

    #[test]
    fn newer_record_wins_in_either_order() {
        for reversed in [false, true] {
            let store: StateStore<String, i64> = StateStore::new();
            let older = remote_set(&store, "x", 1, 10);
            let newer = remote_set(&store, "x", 2, 20);
            let (first, second) = if reversed { (newer, older) } else { (older, newer) };

            store.apply(first).unwrap();
            store.apply(second).unwrap();

            assert_eq!(store.get(&"x".to_string()), Some(20), "reversed={reversed}");
            assert_eq!(store.version(&"x".to_string()).unwrap().seq, 2);
        }
    }

    #[test]
    fn stale_record_is_reported_and_ignored() {
        let store: StateStore<String, i64> = StateStore::new();
        store.apply(remote_set(&store, "x", 5, 50)).unwrap();

        let outcome = store.apply(remote_set(&store, "x", 4, 40)).unwrap();

        assert_eq!(outcome, AppliedOutcome::StaleOutOfOrder);
        assert_eq!(store.get(&"x".to_string()), Some(50));
    }

    #[test]
    fn equal_sequence_is_reapplied() {
        let store: StateStore<String, i64> = StateStore::new();
        store.apply(remote_set(&store, "x", 3, 1)).unwrap();

        let outcome = store.apply(remote_set(&store, "x", 3, 2)).unwrap();

        assert_eq!(outcome, AppliedOutcome::Applied);
        assert_eq!(store.get(&"x".to_string()), Some(2));
    }

    #[test]
    fn tombstone_rejects_older_set() {
        let store: StateStore<String, i64> = StateStore::new();
        store.apply(remote_set(&store, "x", 1, 1)).unwrap();
        assert_eq!(
            store.apply(remote_delete(&store, "x", 2)).unwrap(),
            AppliedOutcome::Deleted
        );

        let outcome = store.apply(remote_set(&store, "x", 1, 1)).unwrap();

        assert_eq!(outcome, AppliedOutcome::StaleOutOfOrder);
        assert_eq!(store.get(&"x".to_string()), None);
        let version = store.version(&"x".to_string()).unwrap();
        assert_eq!(version.operation().unwrap(), Operation::Delete);
    }

    #[test]
    fn remote_delete_of_unknown_key_is_not_an_error() {
        let store: StateStore<String, i64> = StateStore::new();

        let outcome = store.apply(remote_delete(&store, "ghost", 1)).unwrap();

        assert_eq!(outcome, AppliedOutcome::DeleteOfUnknownKey);
        assert!(store.version(&"ghost".to_string()).is_some());
    }

    #[test]
    fn local_delete_of_missing_key_changes_nothing() {
        let store: StateStore<String, i64> = StateStore::new();

        assert!(matches!(store.delete(&"x".to_string()), Err(Error::NotFound)));
        assert!(store.version(&"x".to_string()).is_none());

        store.set("x".to_string(), 1).unwrap();
        let record = store.delete(&"x".to_string()).unwrap();
        assert_eq!(record.seq, 2);
        assert_eq!(record.operation().unwrap(), Operation::Delete);

        // Already deleted: the tombstone stays at seq 2.
        assert!(matches!(store.delete(&"x".to_string()), Err(Error::NotFound)));
        assert_eq!(store.version(&"x".to_string()).unwrap().seq, 2);
        assert_eq!(store.get_or(&"x".to_string(), -1), -1);
    }

    #[test]
    fn oversized_set_is_refused_without_side_effects() {
        let store: StateStore<String, String> = StateStore::new().with_max_record_len(64);

        let err = store.set("k".to_string(), "v".repeat(100)).unwrap_err();

        assert!(matches!(err, Error::PayloadTooLarge { limit: 64, .. }));
        assert!(store.is_empty());
        assert!(store.version(&"k".to_string()).is_none());
    }

    #[test]
    fn undecodable_record_leaves_tables_untouched() {
        let store: StateStore<String, i64> = StateStore::new();
        let mut record = remote_set(&store, "x", 1, 1);
        record.payload.truncate(3);

        assert!(matches!(store.apply(record), Err(Error::Codec(_))));
        assert!(store.version(&"x".to_string()).is_none());
    }

    #[test]
    fn json_codec_store_round_trips() {
        let store: StateStore<(String, u32), Vec<String>, JsonCodec> =
            StateStore::with_codec(JsonCodec);
        let key = ("room".to_string(), 7);

        let record = store.set(key.clone(), vec!["alice".into()]).unwrap();
        assert_eq!(record.key, br#"["room",7]"#);

        let replica: StateStore<(String, u32), Vec<String>, JsonCodec> =
            StateStore::with_codec(JsonCodec);
        assert_eq!(replica.apply(record).unwrap(), AppliedOutcome::Applied);
        assert_eq!(replica.get(&key), Some(vec!["alice".to_string()]));
        assert_eq!(replica.snapshot().len(), 1);
    }

    #[test]
    fn concurrent_writers_and_appliers_keep_tables_consistent() {
        const THREADS: u64 = 4;
        const ROUNDS: u64 = 200;
        const LAST: u64 = THREADS * ROUNDS;
        let store: Arc<StateStore<String, i64>> = Arc::new(StateStore::new());
        let done = Arc::new(AtomicBool::new(false));

        // Every visible value must be backed by a SET version, at every instant.
        let reader = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let tables = store.tables.lock();
                    for key in tables.data.keys() {
                        let version = tables.states.get(key).expect("value without version");
                        assert_eq!(version.operation().unwrap(), Operation::Set);
                    }
                    drop(tables);
                    let _ = store.get(&"remote-a".to_string());
                }
            })
        };

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut local_seqs = Vec::new();
                    for round in 0..ROUNDS {
                        let local = format!("local-{}", round % 3);
                        let record = store.set(local.clone(), round as i64).unwrap();
                        local_seqs.push((local, record.seq));

                        // Remote seqs 1..=LAST are spread over the threads and
                        // arrive interleaved; every fifth one is a delete.
                        let seq = round * THREADS + t + 1;
                        for key in ["remote-a", "remote-b"] {
                            let record = if seq % 5 == 0 && seq != LAST {
                                remote_delete(&store, key, seq)
                            } else {
                                remote_set(&store, key, seq, seq as i64)
                            };
                            store.apply(record).unwrap();
                        }
                    }
                    local_seqs
                })
            })
            .collect();

        let mut seqs_by_key: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for worker in workers {
            for (key, seq) in worker.join().unwrap() {
                seqs_by_key.entry(key).or_default().push(seq);
            }
        }
        done.store(true, Ordering::Release);
        reader.join().unwrap();

        for (key, mut seqs) in seqs_by_key {
            seqs.sort_unstable();
            let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
            assert_eq!(seqs, expected, "local seqs for {key} must have no gaps");
            assert_eq!(store.version(&key).unwrap().seq, seqs.len() as u64);
        }
        for key in ["remote-a", "remote-b"] {
            let key = key.to_string();
            assert_eq!(store.version(&key).unwrap().seq, LAST);
            assert_eq!(store.get(&key), Some(LAST as i64));
        }
    }
}
