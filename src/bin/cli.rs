use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use log::debug;

use memkv::client;
use memkv::client::cli::KeyTtl;
use memkv::client::cmd::Command;
use memkv::consts::DEFAULT_ROOT_URL;
use memkv::error::MemKvClientError;
use memkv::logger;

#[derive(Parser, Debug)]
#[command(
    name = "memkv-cli",
    version,
    author,
    about = "Send requests to a running memkv server"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Root URL of the server to send requests to.
    #[arg(long, default_value = DEFAULT_ROOT_URL)]
    root_url: String,
}

/// Entry point for the endpoint CLI.
///
/// `flavor = "current_thread"` is used here to avoid spawning background
/// threads. The CLI tool use case benefits more by being lighter instead of
/// multi-threaded.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), MemKvClientError> {
    dotenv().ok();
    logger::init(false);

    // Parse command line arguments
    let cli = Cli::parse();
    debug!("get cli: {:?}", cli);

    let client = client::connect(&cli.root_url)?;

    // Process the requested command
    match cli.command {
        Command::Get { key } => {
            if let Some(found) = client.get(&key).await? {
                println!("\"{}\"", found.value);
            } else {
                println!("(nil)");
            }
        }
        Command::GetTtl { key } => match client.get_ttl(&key).await? {
            Some(KeyTtl { ttl: Some(ttl), .. }) => println!("{}", ttl),
            Some(_) => println!("(no ttl)"),
            None => println!("(nil)"),
        },
        Command::Put { key, value, ttl } => {
            let existed = client.put(&key, &value, ttl).await?;
            if existed {
                println!("OK (updated)");
            } else {
                println!("OK (created)");
            }
        }
        Command::Post { value, ttl } => {
            let created = client.create(&value, ttl).await?;
            println!("{}", created.key);
        }
        Command::Delete { key } => {
            if client.delete(&key).await? {
                println!("OK");
            } else {
                println!("(nil)");
            }
        }
        Command::Publish { channel, message } => {
            client.publish(&channel, &message).await?;
            println!("Publish OK");
        }
        Command::Subscribe { channel, timeout } => {
            let mut subscriber = client.subscribe(&channel).await?;

            // Await messages on the channel until the timeout elapses; the
            // elapsed timer is the normal way for a subscription to end.
            let deadline = Duration::from_secs(timeout);
            let drained = tokio::time::timeout(deadline, async {
                while let Some(message) = subscriber.next_message().await? {
                    println!("data: {}", message);
                }
                Ok::<(), MemKvClientError>(())
            })
            .await;

            if let Ok(result) = drained {
                result?;
            }
        }
    }

    Ok(())
}
