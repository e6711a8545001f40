//! Database façade shared across all connections, plus the background expiry
//! scheduler and persistence cycles.

use std::sync::{Arc, RwLock};

use log::{debug, info};
use tokio::sync::Notify;
use tokio::time::{self, Duration};
use uuid::Uuid;

use crate::config::{DbConfig, StartupFormat};
use crate::error::StorageError;
use crate::storage::now_unix;
use crate::storage::persist;
use crate::storage::store::{Entry, Store};
use crate::storage::traits::KvStore;

/// A wrapper around a `Db` instance. This exists to allow orderly cleanup
/// of the `Db` by signalling the background tasks to shut down when this
/// struct is dropped.
#[derive(Debug)]
pub(crate) struct DbDropGuard {
    db: Db,
}

impl DbDropGuard {
    /// Create a new `DbDropGuard`, wrapping a `Db` instance. When this is
    /// dropped the `Db`'s background tasks will be shut down.
    ///
    /// Fails when a configured startup file cannot be read or parsed; the
    /// caller should treat that as fatal and exit before serving.
    pub(crate) fn new(config: DbConfig) -> Result<DbDropGuard, StorageError> {
        Ok(DbDropGuard {
            db: Db::new(config)?,
        })
    }

    /// Get the shared database. Internally, this is an `Arc`, so a clone only
    /// increments the ref count.
    pub(crate) fn db(&self) -> Db {
        self.db.clone()
    }
}

impl Drop for DbDropGuard {
    fn drop(&mut self) {
        // Signal the expiry scheduler and persistence cycles to exit.
        self.db.shutdown_background_tasks();
    }
}

/// Server store shared across all connections.
///
/// A `Db` instance is a handle to shared state. Cloning `Db` is shallow and
/// only incurs an atomic ref count increment.
///
/// When a `Db` value is created, a background expiry task is spawned, plus
/// one persistence task per enabled mechanism. The tasks run until
/// `shutdown_background_tasks` flips the shutdown flag.
#[derive(Debug, Clone)]
pub(crate) struct Db {
    /// Handle to shared state. The background tasks also hold an
    /// `Arc<SharedDb>`.
    shared: Arc<SharedDb>,
}

#[derive(Debug)]
struct SharedDb {
    /// The store is guarded by a reader-writer lock: lookups take read
    /// locks, mutations and scheduler eviction take the write lock. No
    /// async operations happen while the lock is held; AOF appends are
    /// synchronous writes inside the critical section so the log order is
    /// exactly the mutation order.
    store: RwLock<Store>,

    /// Wakes the expiry scheduler when a new expiry is pushed. `Notify`
    /// coalesces: senders never block and a pending signal absorbs further
    /// sends until the scheduler observes it.
    new_item: Notify,

    config: DbConfig,
}

impl Db {
    /// Create a `Db` instance: load initial data if configured, then spawn
    /// the expiry scheduler and the enabled persistence cycles.
    pub(crate) fn new(config: DbConfig) -> Result<Db, StorageError> {
        let mut store = Store::new();

        if let Some(path) = &config.startup_file {
            match config.startup_format {
                StartupFormat::Snapshot => persist::load_snapshot(&mut store, path)?,
                StartupFormat::Aof => persist::replay_aof(&mut store, path)?,
            }
            info!(
                "initialized database from {} ({} keys)",
                path.display(),
                store.entries.len()
            );
        }

        let shared = Arc::new(SharedDb {
            store: RwLock::new(store),
            new_item: Notify::new(),
            config,
        });

        tokio::spawn(Db::expire_entries_task(shared.clone()));
        if shared.config.aof_persist {
            tokio::spawn(Db::aof_persist_cycle(shared.clone()));
        }
        if shared.config.snapshot_persist {
            tokio::spawn(Db::snapshot_persist_cycle(shared.clone()));
        }

        Ok(Db { shared })
    }

    pub(crate) fn config(&self) -> &DbConfig {
        &self.shared.config
    }

    /// Final persistence flush: fsync the AOF and write one last snapshot,
    /// for whichever mechanisms are enabled. Called by the server once all
    /// handlers have returned during graceful shutdown.
    pub(crate) fn shutdown(&self) {
        if self.shared.config.aof_persist {
            info!("flushing aof");
            persist::sync_aof(&self.shared.config.aof_persist_file);
        }

        if self.shared.config.snapshot_persist {
            info!("writing final snapshot");
            let store = self.shared.store.write().unwrap();
            persist::write_snapshot(&store, &self.shared.config.snapshot_persist_file);
        }
    }

    /// Signals the background tasks to shut down. This is called by the
    /// `DbDropGuard`'s `Drop` implementation.
    fn shutdown_background_tasks(&self) {
        let mut store = self.shared.store.write().unwrap();
        store.shutdown = true;

        // Drop the lock before signalling so the scheduler doesn't wake up
        // only to block on the lock this function still holds.
        drop(store);
        self.shared.new_item.notify_one();
    }

    /// Routine executed by the expiry scheduler task.
    ///
    /// Sleep until the earliest scheduled expiry, or until a new expiry is
    /// pushed (which may be earlier than the one currently waited on), then
    /// evict everything that is due.
    async fn expire_entries_task(shared: Arc<SharedDb>) {
        info!("expiry scheduler started");

        while !shared.is_shutdown() {
            let next = {
                let store = shared.store.read().unwrap();
                store.expirations.peek().map(|entry| entry.expires_at)
            };

            // Nothing scheduled: block until a ttl is pushed.
            let Some(next) = next else {
                shared.new_item.notified().await;
                continue;
            };

            let delay = next - now_unix();
            if delay > 0 {
                tokio::select! {
                    _ = time::sleep(Duration::from_secs(delay as u64)) => {}
                    _ = shared.new_item.notified() => {
                        // A new expiry may now be the earliest; re-evaluate.
                        continue;
                    }
                }
            }

            shared.drain_expired();
        }

        info!("expiry scheduler shut down");
    }

    /// Periodically fsync the AOF so buffered appends reach stable storage.
    async fn aof_persist_cycle(shared: Arc<SharedDb>) {
        info!("aof persistence cycle started");

        loop {
            time::sleep(shared.config.aof_persist_period).await;
            if shared.is_shutdown() {
                return;
            }
            debug!("syncing aof");
            persist::sync_aof(&shared.config.aof_persist_file);
        }
    }

    /// Periodically write the full store to the snapshot file.
    async fn snapshot_persist_cycle(shared: Arc<SharedDb>) {
        info!("snapshot persistence cycle started");

        loop {
            time::sleep(shared.config.snapshot_persist_period).await;
            if shared.is_shutdown() {
                return;
            }
            debug!("writing snapshot");
            let store = shared.store.write().unwrap();
            persist::write_snapshot(&store, &shared.config.snapshot_persist_file);
        }
    }
}

impl KvStore for Db {
    /// Store `value` under a freshly generated UUID key.
    ///
    /// The collision arm exists for completeness: a v4 UUID colliding with a
    /// live key is astronomically unlikely, and callers may simply retry.
    fn create(&self, value: String, ttl: Option<i64>) -> (bool, String) {
        let mut store = self.shared.store.write().unwrap();

        let key = Uuid::new_v4().to_string();
        if store.entries.contains_key(&key) {
            return (false, key);
        }

        let expires_at = ttl.map(|t| t + now_unix());
        persist::append_put(&self.shared.config, &key, &value, expires_at);

        store.entries.insert(key.clone(), Entry { value, expires_at });
        if let Some(at) = expires_at {
            store.expirations.push(key.clone(), at);
        }

        // Release the lock before notifying to avoid waking the scheduler
        // into a lock it cannot take yet.
        drop(store);
        if expires_at.is_some() {
            self.shared.new_item.notify_one();
        }

        (true, key)
    }

    /// Get the value associated with a key.
    ///
    /// Returns `None` for a missing key and for a key whose expiry has
    /// passed, even when the scheduler has not evicted the entry yet.
    fn get(&self, key: &str) -> Option<String> {
        let store = self.shared.store.read().unwrap();

        let entry = store.entries.get(key)?;
        match entry.expires_at {
            None => Some(entry.value.clone()),
            Some(at) if at > now_unix() => Some(entry.value.clone()),
            Some(_) => None,
        }
    }

    fn get_ttl(&self, key: &str) -> (Option<i64>, bool) {
        let store = self.shared.store.read().unwrap();
        let now = now_unix();

        match store.entries.get(key) {
            None => (None, false),
            Some(entry) => match entry.expires_at {
                None => (None, true),
                Some(at) if at > now => (Some(at - now), true),
                Some(_) => (None, false),
            },
        }
    }

    /// Set `key` to `value`, overwriting any existing entry. A missing `ttl`
    /// clears any existing expiry; a present one schedules eviction. Returns
    /// whether the key existed before.
    fn put(&self, key: String, value: String, ttl: Option<i64>) -> bool {
        let mut store = self.shared.store.write().unwrap();

        let expires_at = ttl.map(|t| t + now_unix());
        persist::append_put(&self.shared.config, &key, &value, expires_at);

        let existed = store
            .entries
            .insert(key.clone(), Entry { value, expires_at })
            .is_some();
        if let Some(at) = expires_at {
            store.expirations.push(key, at);
        }

        drop(store);
        if expires_at.is_some() {
            self.shared.new_item.notify_one();
        }

        existed
    }

    fn delete(&self, key: &str) -> bool {
        let mut store = self.shared.store.write().unwrap();

        persist::append_delete(&self.shared.config, key);
        store.entries.remove(key).is_some()
    }
}

impl SharedDb {
    /// Pop and evict every index entry whose expiry has passed. The store is
    /// the source of truth: an entry is deleted only when its current expiry
    /// equals the popped one, otherwise the index entry is stale and is
    /// discarded. Real evictions append a `DELETE` record.
    fn drain_expired(&self) {
        let mut store = self.store.write().unwrap();

        if store.shutdown {
            return;
        }

        // `lock()` returns a guard, not `&mut Store`; take a real mutable
        // reference so both the index and the entries map can be borrowed.
        let store = &mut *store;

        while let Some(next_at) = store.expirations.peek().map(|entry| entry.expires_at) {
            if next_at > now_unix() {
                break;
            }

            let Some(expired) = store.expirations.pop() else {
                break;
            };

            match store.entries.get(&expired.key) {
                Some(entry) if entry.expires_at == Some(expired.expires_at) => {
                    persist::append_delete(&self.config, &expired.key);
                    store.entries.remove(&expired.key);
                    debug!("evicted expired key: {}", expired.key);
                }
                // The key was deleted, overwritten without a ttl, or given a
                // different expiry since this index entry was pushed.
                _ => {}
            }
        }
    }

    /// Returns `true` once the owning `DbDropGuard` has dropped.
    fn is_shutdown(&self) -> bool {
        self.store.read().unwrap().shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get() {
        let db = Db::new(DbConfig::new()).unwrap();

        let (created, key) = db.create("hello".into(), None);
        assert!(created);
        assert_eq!(db.get(&key), Some("hello".to_string()));
        assert_eq!(db.get_ttl(&key), (None, true));
    }

    #[tokio::test]
    async fn put_reports_prior_existence() {
        let db = Db::new(DbConfig::new()).unwrap();

        assert!(!db.put("k".into(), "v1".into(), None));
        assert!(db.put("k".into(), "v2".into(), None));
        assert_eq!(db.get("k"), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn delete_reports_prior_existence() {
        let db = Db::new(DbConfig::new()).unwrap();

        db.put("k".into(), "v".into(), None);
        assert!(db.delete("k"));
        assert!(!db.delete("k"));
        assert_eq!(db.get("k"), None);
    }

    #[tokio::test]
    async fn ttl_is_reported_with_drift_allowance() {
        let db = Db::new(DbConfig::new()).unwrap();

        db.put("k".into(), "v".into(), Some(10));
        let (remaining, present) = db.get_ttl("k");
        assert!(present);
        let remaining = remaining.unwrap();
        assert!((8..=10).contains(&remaining), "remaining = {}", remaining);
    }

    #[tokio::test]
    async fn zero_ttl_reads_as_expired() {
        let db = Db::new(DbConfig::new()).unwrap();

        db.put("k".into(), "v".into(), Some(0));
        assert_eq!(db.get("k"), None);
        assert_eq!(db.get_ttl("k"), (None, false));
    }

    #[tokio::test]
    async fn put_without_ttl_clears_expiry() {
        let db = Db::new(DbConfig::new()).unwrap();

        db.put("k".into(), "v".into(), Some(0));
        assert_eq!(db.get("k"), None);

        db.put("k".into(), "v".into(), None);
        assert_eq!(db.get("k"), Some("v".to_string()));
        assert_eq!(db.get_ttl("k"), (None, true));
    }

    #[tokio::test]
    async fn scheduler_evicts_expired_entries() {
        let db = Db::new(DbConfig::new()).unwrap();

        db.put("short".into(), "v".into(), Some(1));
        db.put("keep".into(), "v".into(), None);

        time::sleep(Duration::from_secs(3)).await;

        let store = db.shared.store.read().unwrap();
        assert!(!store.entries.contains_key("short"));
        assert!(store.entries.contains_key("keep"));
    }

    #[tokio::test]
    async fn scheduler_skips_stale_index_entries() {
        let db = Db::new(DbConfig::new()).unwrap();

        // The 1-second expiry entry goes stale when the ttl is cleared.
        db.put("k".into(), "v".into(), Some(1));
        db.put("k".into(), "v".into(), None);

        time::sleep(Duration::from_secs(3)).await;

        assert_eq!(db.get("k"), Some("v".to_string()));
        let store = db.shared.store.read().unwrap();
        assert!(store.expirations.is_empty());
    }

    #[tokio::test]
    async fn mutations_append_aof_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.aof");
        let db = Db::new(DbConfig::new().with_aof_persistence(&path)).unwrap();

        db.put("a".into(), "1".into(), None);
        db.put("a".into(), "2".into(), None);
        db.delete("a");

        let log = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines, vec!["PUT a 1 -1", "PUT a 2 -1", "DELETE a"]);
    }

    #[tokio::test]
    async fn eviction_appends_delete_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.aof");
        let db = Db::new(DbConfig::new().with_aof_persistence(&path)).unwrap();

        db.put("gone".into(), "v".into(), Some(1));
        time::sleep(Duration::from_secs(3)).await;

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.lines().any(|line| line == "DELETE gone"));
    }

    #[tokio::test]
    async fn startup_replays_aof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.aof");
        std::fs::write(&path, "PUT a 1 -1\nPUT b 2 -1\nDELETE b\n").unwrap();

        let db = Db::new(
            DbConfig::new().with_startup_file(&path, StartupFormat::Aof),
        )
        .unwrap();

        assert_eq!(db.get("a"), Some("1".to_string()));
        assert_eq!(db.get("b"), None);
    }

    #[tokio::test]
    async fn snapshot_then_restore_preserves_expiries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        let db = Db::new(DbConfig::new().with_snapshot_persistence(&path)).unwrap();
        db.put("forever".into(), "v".into(), None);
        db.put("later".into(), "w".into(), Some(1000));
        db.shutdown();

        let restored = Db::new(
            DbConfig::new().with_startup_file(&path, StartupFormat::Snapshot),
        )
        .unwrap();

        assert_eq!(restored.get("forever"), Some("v".to_string()));
        assert_eq!(restored.get("later"), Some("w".to_string()));
        let (remaining, present) = restored.get_ttl("later");
        assert!(present);
        assert!(remaining.unwrap() > 990);
    }

    #[tokio::test]
    async fn random_put_delete_sequences_match_a_model() {
        use rand::Rng;
        use std::collections::HashMap;

        let db = Db::new(DbConfig::new()).unwrap();
        let mut model: HashMap<String, String> = HashMap::new();
        let mut rng = rand::thread_rng();
        let keys = ["a", "b", "c", "d", "e"];

        for _ in 0..500 {
            let key = keys[rng.gen_range(0..keys.len())];
            if rng.gen_bool(0.7) {
                let value = format!("v{}", rng.gen_range(0..1000));
                db.put(key.to_string(), value.clone(), None);
                model.insert(key.to_string(), value);
            } else {
                db.delete(key);
                model.remove(key);
            }
        }

        for key in keys {
            assert_eq!(db.get(key), model.get(key).cloned(), "key {}", key);
        }
    }

    #[tokio::test]
    async fn missing_startup_file_is_fatal() {
        let result = Db::new(
            DbConfig::new().with_startup_file("does-not-exist.json", StartupFormat::Snapshot),
        );
        assert!(matches!(result, Err(StorageError::StartupRead { .. })));
    }
}
