use std::pin::Pin;

use async_stream::try_stream;
use bytes::Bytes;
use log::debug;
use tokio_stream::{Stream, StreamExt};

use crate::error::MemKvClientError;

/// A client that has subscribed to a channel.
///
/// Wraps the open SSE response and reassembles `data:` frames out of the
/// byte stream, chunk boundaries notwithstanding.
pub struct Subscriber {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: String,
}

impl Subscriber {
    pub(crate) fn new(response: reqwest::Response) -> Subscriber {
        Subscriber {
            stream: Box::pin(response.bytes_stream()),
            buffer: String::new(),
        }
    }

    /// Receive the next message published on the subscribed channel, waiting
    /// if necessary.
    ///
    /// `None` indicates the subscription has been terminated.
    pub async fn next_message(&mut self) -> Result<Option<String>, MemKvClientError> {
        loop {
            if let Some(pos) = self.buffer.find('\n') {
                let line: String = self.buffer.drain(..=pos).collect();
                let line = line.trim_end();

                if let Some(message) = line.strip_prefix("data: ") {
                    debug!("subscriber received message: {}", message);
                    return Ok(Some(message.to_string()));
                }

                // Blank separators and non-data fields are skipped.
                continue;
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buffer.push_str(&String::from_utf8_lossy(&chunk)),
                Some(Err(err)) => return Err(err.into()),
                None => return Ok(None),
            }
        }
    }

    /// Convert the subscriber into a `Stream` yielding new messages published
    /// on the subscribed channel.
    ///
    /// `Subscriber` does not implement `Stream` itself; the conversion uses
    /// the `async-stream` crate to build one on top of `next_message`.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<String, MemKvClientError>> {
        try_stream! {
            while let Some(message) = self.next_message().await? {
                yield message;
            }
        }
    }
}
