//! Dual persistence: the append-only command log and full JSON snapshots.
//!
//! The AOF receives one line per committed mutation, written while the store
//! lock is held so the log order is exactly the mutation order. The snapshot
//! is a single JSON document holding the whole store plus the expiry index's
//! internal array. Either file can be used to initialize the database at
//! startup.
//!
//! Persistence failures are logged and never surfaced to clients; the
//! in-memory operation has already succeeded by the time the append fails.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::config::DbConfig;
use crate::error::StorageError;
use crate::storage::heap::{ExpiryEntry, ExpiryIndex};
use crate::storage::store::{Entry, Store};

/// Append a `PUT` record. The third field is the absolute Unix-second expiry,
/// or `-1` for entries that never expire; replay applies the same convention.
///
/// The record format is line-oriented and space-separated, so a value
/// containing whitespace produces a record the replayer skips. Callers
/// validate values at the API boundary; the limitation is inherited from the
/// log format itself.
pub(crate) fn append_put(config: &DbConfig, key: &str, value: &str, expires_at: Option<i64>) {
    if !config.aof_persist {
        return;
    }
    let line = format!("PUT {} {} {}", key, value, expires_at.unwrap_or(-1));
    append_line(&config.aof_persist_file, &line);
}

/// Append a `DELETE` record.
pub(crate) fn append_delete(config: &DbConfig, key: &str) {
    if !config.aof_persist {
        return;
    }
    let line = format!("DELETE {}", key);
    append_line(&config.aof_persist_file, &line);
}

fn append_line(path: &Path, line: &str) {
    let file = OpenOptions::new().append(true).create(true).open(path);
    let mut file = match file {
        Ok(file) => file,
        Err(err) => {
            error!("failed to open aof file {}: {}", path.display(), err);
            return;
        }
    };

    if let Err(err) = writeln!(file, "{}", line) {
        error!("failed to append to aof file {}: {}", path.display(), err);
    }
}

/// Push buffered AOF appends to stable storage. Called periodically by the
/// AOF persistence cycle and once more at shutdown.
pub(crate) fn sync_aof(path: &Path) {
    let file = OpenOptions::new().append(true).create(true).open(path);
    match file {
        Ok(file) => {
            if let Err(err) = file.sync_all() {
                error!("failed to sync aof file {}: {}", path.display(), err);
            }
        }
        Err(err) => error!("failed to open aof file {}: {}", path.display(), err),
    }
}

/// The snapshot document. `dbStore` maps keys to entries with absolute
/// expiries; `ttlHeap` is the expiry index's internal array, which need not
/// be sorted but regains the heap property on load.
#[derive(Serialize)]
struct SnapshotRef<'a> {
    #[serde(rename = "dbStore")]
    db_store: &'a HashMap<String, Entry>,
    #[serde(rename = "ttlHeap")]
    ttl_heap: Vec<ExpiryEntry>,
}

#[derive(Deserialize)]
struct SnapshotDoc {
    #[serde(rename = "dbStore")]
    db_store: HashMap<String, Entry>,
    #[serde(rename = "ttlHeap")]
    ttl_heap: Vec<ExpiryEntry>,
}

/// Write the full store as an indented JSON document, truncating any
/// previous snapshot. The caller holds the store's write lock.
pub(crate) fn write_snapshot(store: &Store, path: &Path) {
    let doc = SnapshotRef {
        db_store: &store.entries,
        ttl_heap: store.expirations.entries(),
    };

    let data = match serde_json::to_string_pretty(&doc) {
        Ok(data) => data,
        Err(err) => {
            error!("failed to serialize snapshot: {}", err);
            return;
        }
    };

    if let Err(err) = std::fs::write(path, data) {
        error!("failed to write snapshot file {}: {}", path.display(), err);
    }
}

/// Restore the store and the expiry index from a snapshot document.
pub(crate) fn load_snapshot(store: &mut Store, path: &Path) -> Result<(), StorageError> {
    let data = std::fs::read_to_string(path).map_err(|source| StorageError::StartupRead {
        path: path.to_path_buf(),
        source,
    })?;

    let doc: SnapshotDoc = serde_json::from_str(&data)?;
    store.entries = doc.db_store;
    store.expirations = ExpiryIndex::from_entries(doc.ttl_heap);
    Ok(())
}

/// Replay an append-only log into the store, line by line.
///
/// `PUT` inserts or overwrites; a third field of `-1` clears the expiry,
/// any other value is the absolute expiry and is pushed into the index.
/// `DELETE` removes the key, silently succeeding when it is absent.
/// Malformed lines are skipped.
pub(crate) fn replay_aof(store: &mut Store, path: &Path) -> Result<(), StorageError> {
    let file = File::open(path).map_err(|source| StorageError::StartupRead {
        path: path.to_path_buf(),
        source,
    })?;

    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| StorageError::StartupRead {
            path: path.to_path_buf(),
            source,
        })?;

        let fields: Vec<&str> = line.split(' ').collect();
        match fields.as_slice() {
            ["PUT", key, value, expiry] => {
                let expires_at = match expiry.parse::<i64>() {
                    Ok(-1) => None,
                    Ok(n) => Some(n),
                    Err(_) => {
                        debug!("skipping aof line with bad expiry: {}", line);
                        continue;
                    }
                };

                if let Some(expires_at) = expires_at {
                    store.expirations.push(key.to_string(), expires_at);
                }
                store.entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        expires_at,
                    },
                );
            }
            ["DELETE", key] => {
                store.entries.remove(*key);
            }
            _ => debug!("skipping malformed aof line: {}", line),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::now_unix;

    fn put(store: &mut Store, key: &str, value: &str, expires_at: Option<i64>) {
        if let Some(at) = expires_at {
            store.expirations.push(key.to_string(), at);
        }
        store.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        let far = now_unix() + 1000;
        let mut store = Store::new();
        put(&mut store, "alpha", "one", None);
        put(&mut store, "beta", "two", Some(far));
        put(&mut store, "gamma", "three", Some(far + 5));

        write_snapshot(&store, &path);

        let mut restored = Store::new();
        load_snapshot(&mut restored, &path).unwrap();

        assert_eq!(restored.entries, store.entries);
        assert_eq!(restored.expirations.len(), 2);
        assert_eq!(restored.expirations.peek().map(|e| e.expires_at), Some(far));
    }

    #[test]
    fn snapshot_overwrites_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        let mut store = Store::new();
        put(&mut store, "old", "value", None);
        write_snapshot(&store, &path);

        let mut store = Store::new();
        put(&mut store, "new", "value", None);
        write_snapshot(&store, &path);

        let mut restored = Store::new();
        load_snapshot(&mut restored, &path).unwrap();
        assert!(restored.entries.contains_key("new"));
        assert!(!restored.entries.contains_key("old"));
    }

    #[test]
    fn replay_reproduces_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.aof");

        let config = DbConfig::new().with_aof_persistence(&path);
        let far = now_unix() + 1000;

        append_put(&config, "a", "1", None);
        append_put(&config, "b", "2", Some(far));
        append_put(&config, "a", "updated", None);
        append_delete(&config, "b");
        append_delete(&config, "missing");

        let mut store = Store::new();
        replay_aof(&mut store, &path).unwrap();

        assert_eq!(store.entries.get("a").map(|e| e.value.as_str()), Some("updated"));
        assert!(!store.entries.contains_key("b"));
        assert!(!store.entries.contains_key("missing"));
        // The stale index entry for "b" survives replay; it is discarded at
        // pop time because the store no longer agrees.
        assert_eq!(store.expirations.len(), 1);
    }

    #[test]
    fn replay_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.aof");

        std::fs::write(
            &path,
            "PUT a 1 -1\nGARBAGE\nPUT broken\nPUT s has spaces -1\nPUT b 2 notanumber\nDELETE a extra\nPUT c 3 -1\n",
        )
        .unwrap();

        let mut store = Store::new();
        replay_aof(&mut store, &path).unwrap();

        assert_eq!(store.entries.len(), 2);
        assert!(store.entries.contains_key("a"));
        assert!(store.entries.contains_key("c"));
    }

    #[test]
    fn replay_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.aof");

        let mut store = Store::new();
        assert!(matches!(
            replay_aof(&mut store, &path),
            Err(StorageError::StartupRead { .. })
        ));
    }

    #[test]
    fn load_rejects_malformed_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, "{not json").unwrap();

        let mut store = Store::new();
        assert!(matches!(
            load_snapshot(&mut store, &path),
            Err(StorageError::SnapshotParse(_))
        ));
    }
}
