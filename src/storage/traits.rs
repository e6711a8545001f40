/// The database façade's operation set.
///
/// Inputs are assumed validated by the HTTP layer: keys and values are
/// non-empty, and ttls, when present, are a nonnegative number of seconds.
pub(crate) trait KvStore {
    /// Store `value` under a freshly generated key. Returns the generated key
    /// and whether the entry was created; `false` means the generated key
    /// collided with an existing one and nothing was stored.
    fn create(&self, value: String, ttl: Option<i64>) -> (bool, String);

    /// Get the value associated with a key.
    ///
    /// Returns `None` if the key is absent or its expiry has passed, even if
    /// the scheduler has not evicted it yet.
    fn get(&self, key: &str) -> Option<String>;

    /// The remaining seconds before `key` expires.
    ///
    /// Returns `(remaining, true)` when the key is present: `remaining` is
    /// `None` for non-expiring keys. Returns `(None, false)` when the key is
    /// missing or already expired.
    fn get_ttl(&self, key: &str) -> (Option<i64>, bool);

    /// Set `key` to `value`, overwriting any existing entry. A `ttl` of
    /// `None` clears any existing expiry. Returns whether the key existed
    /// before.
    fn put(&self, key: String, value: String, ttl: Option<i64>) -> bool;

    /// Remove `key`. Returns whether it existed.
    fn delete(&self, key: &str) -> bool;
}
