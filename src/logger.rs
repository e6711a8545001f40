//! Logger initialization shared by the server and CLI binaries.
//!
//! Log levels are taken from the `RUST_LOG` environment variable, defaulting
//! to `info`. Passing `quiet` silences all output, which backs the server's
//! `--no-log` flag.

use env_logger::Env;
use log::LevelFilter;

pub fn init(quiet: bool) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if quiet {
        builder.filter_level(LevelFilter::Off);
    }

    // `try_init` so that tests initializing the logger more than once do not
    // panic; only the first initialization takes effect.
    let _ = builder.try_init();
}
