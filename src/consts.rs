/// Default address the server listens on.
///
/// Used if no host is specified.
pub const DEFAULT_HOST: &str = "127.0.0.1:8080";

/// Default root URL the endpoint CLI sends requests to.
pub const DEFAULT_ROOT_URL: &str = "http://127.0.0.1:8080";

/// Capacity of a single subscriber mailbox.
///
/// When a mailbox is full, further publishes to that subscriber are dropped
/// silently rather than blocking the publisher.
pub const MAILBOX_CAPACITY: usize = 10;

/// Default period between full-snapshot persistence cycles, in seconds.
pub const DEFAULT_SNAPSHOT_PERIOD_SECS: u64 = 300;

/// Default period between append-only-file fsync cycles, in seconds.
pub const DEFAULT_AOF_SYNC_PERIOD_SECS: u64 = 1;

/// Minimum time the server spends in the shutdown path, in seconds.
///
/// Exceeded only if the final persistence flush takes longer.
pub const SHUTDOWN_MIN_WAIT_SECS: u64 = 1;
