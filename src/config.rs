//! Database configuration.
//!
//! `DbConfig` collects the persistence and startup options for a database
//! instance. Both persistence mechanisms (append-only file and full
//! snapshot) can be enabled together or separately; at most one startup
//! source is consulted when the database is constructed.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

use crate::consts::{DEFAULT_AOF_SYNC_PERIOD_SECS, DEFAULT_SNAPSHOT_PERIOD_SECS};

/// Which kind of file `startup_file` points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StartupFormat {
    /// A JSON snapshot document written by a previous run.
    #[default]
    Snapshot,
    /// An append-only command log to replay line by line.
    Aof,
}

impl fmt::Display for StartupFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupFormat::Snapshot => write!(f, "snapshot"),
            StartupFormat::Aof => write!(f, "aof"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    /// File to initialize the database from, if any.
    pub startup_file: Option<PathBuf>,

    /// How to interpret `startup_file`.
    pub startup_format: StartupFormat,

    /// Whether mutations are appended to the AOF.
    pub aof_persist: bool,

    /// Path of the append-only file.
    pub aof_persist_file: PathBuf,

    /// Period between AOF fsync cycles.
    pub aof_persist_period: Duration,

    /// Whether periodic full snapshots are written.
    pub snapshot_persist: bool,

    /// Path the snapshot document is written to.
    pub snapshot_persist_file: PathBuf,

    /// Period between snapshot cycles.
    pub snapshot_persist_period: Duration,
}

impl Default for DbConfig {
    fn default() -> DbConfig {
        DbConfig {
            startup_file: None,
            startup_format: StartupFormat::Snapshot,
            aof_persist: false,
            aof_persist_file: PathBuf::from("persist.aof"),
            aof_persist_period: Duration::from_secs(DEFAULT_AOF_SYNC_PERIOD_SECS),
            snapshot_persist: false,
            snapshot_persist_file: PathBuf::from("persist-snapshot.json"),
            snapshot_persist_period: Duration::from_secs(DEFAULT_SNAPSHOT_PERIOD_SECS),
        }
    }
}

impl DbConfig {
    pub fn new() -> DbConfig {
        DbConfig::default()
    }

    /// Initialize the database from `file` at startup. An unreadable or
    /// malformed file is a fatal startup error.
    pub fn with_startup_file(mut self, file: impl Into<PathBuf>, format: StartupFormat) -> Self {
        self.startup_file = Some(file.into());
        self.startup_format = format;
        self
    }

    /// Enable AOF persistence, appending every mutation to `file`.
    pub fn with_aof_persistence(mut self, file: impl Into<PathBuf>) -> Self {
        self.aof_persist = true;
        self.aof_persist_file = file.into();
        self
    }

    /// Set the period between AOF fsync cycles.
    pub fn with_aof_persistence_period(mut self, period: Duration) -> Self {
        self.aof_persist_period = period;
        self
    }

    /// Enable periodic full snapshots written to `file`.
    pub fn with_snapshot_persistence(mut self, file: impl Into<PathBuf>) -> Self {
        self.snapshot_persist = true;
        self.snapshot_persist_file = file.into();
        self
    }

    /// Set the period between snapshot cycles.
    pub fn with_snapshot_persistence_period(mut self, period: Duration) -> Self {
        self.snapshot_persist_period = period;
        self
    }
}
