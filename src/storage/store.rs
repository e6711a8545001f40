//! Core store shared between the database façade and the expiry scheduler.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::storage::heap::ExpiryIndex;

#[derive(Debug, Default)]
pub(crate) struct Store {
    /// The key-value data. A `std::collections::HashMap` is sufficient for a
    /// single-node store; the lock above it is the concurrency story.
    pub(crate) entries: HashMap<String, Entry>,

    /// Tracks key expiries, ordered by when they expire. The store is the
    /// source of truth: the index may hold entries whose (key, expiry) no
    /// longer matches an entry here, and those are skipped on pop.
    pub(crate) expirations: ExpiryIndex,

    /// True when the last database handle has dropped. Signals the expiry
    /// scheduler and the persistence cycles to exit.
    pub(crate) shutdown: bool,
}

/// Entry in the key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Entry {
    /// Stored value.
    pub(crate) value: String,

    /// Absolute Unix second at which the entry expires. `None` means the
    /// entry never expires.
    #[serde(rename = "ttl")]
    pub(crate) expires_at: Option<i64>,
}

impl Store {
    pub(crate) fn new() -> Store {
        Store::default()
    }
}
