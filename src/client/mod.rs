use crate::client::cli::Client;
use crate::error::MemKvClientError;

pub mod cli;
pub mod cmd;
mod subscriber;

pub use subscriber::Subscriber;

/// Create a client for the memkv server rooted at `root_url`, e.g.
/// `http://127.0.0.1:8080`.
///
/// # Examples
///
/// ```no_run
/// #[tokio::main]
/// async fn main() {
///     let client = match memkv::client::connect("http://127.0.0.1:8080") {
///         Ok(client) => client,
///         Err(_) => panic!("failed to build client"),
///     };
/// # drop(client);
/// }
/// ```
pub fn connect(root_url: &str) -> Result<Client, MemKvClientError> {
    let http = reqwest::Client::builder().build()?;

    Ok(Client {
        http,
        root_url: root_url.trim_end_matches('/').to_string(),
    })
}
