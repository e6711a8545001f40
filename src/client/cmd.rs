use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Get the value of key.
    Get {
        /// Name of key to get
        key: String,
    },
    /// Get the remaining time-to-live of key.
    GetTtl {
        /// Name of key to look up
        key: String,
    },
    /// Set key to hold the string value.
    Put {
        /// Name of key to set
        key: String,

        /// Value to set
        value: String,

        /// Expire the value after the specified number of seconds
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Store a value under a server-generated key.
    Post {
        /// Value to store
        value: String,

        /// Expire the value after the specified number of seconds
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Delete a key.
    Delete {
        /// Name of key to delete
        key: String,
    },
    /// Publish a message to a specific channel.
    Publish {
        /// Name of channel
        channel: String,

        /// Message to publish
        message: String,
    },
    /// Subscribe to a specific channel and print messages as they arrive.
    Subscribe {
        /// Channel to subscribe to
        channel: String,

        /// How long to stay subscribed, in seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
}
