//! Minimal memkv client implementation.
//!
//! Provides methods for issuing requests against every endpoint of a running
//! server. Built with [`connect`](fn@crate::client::connect).

use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::client::subscriber::Subscriber;
use crate::error::MemKvClientError;

/// Client for a memkv server.
///
/// Backed by a `reqwest::Client`; basic functionality only (no retrying).
pub struct Client {
    pub(crate) http: reqwest::Client,
    pub(crate) root_url: String,
}

/// Response to a successful `create`.
#[derive(Debug, Deserialize)]
pub struct CreatedKey {
    pub key: String,
}

/// A key and its stored value.
#[derive(Debug, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// A key and its remaining time-to-live in seconds; `None` means the key
/// never expires.
#[derive(Debug, Deserialize)]
pub struct KeyTtl {
    pub key: String,
    pub ttl: Option<i64>,
}

#[derive(Debug, Serialize)]
struct WriteBody<'a> {
    value: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<i64>,
}

#[derive(Debug, Serialize)]
struct PublishBody<'a> {
    message: &'a str,
}

impl Client {
    /// Store `value` under a server-generated key, with an optional ttl in
    /// seconds. Returns the generated key.
    pub async fn create(
        &self,
        value: &str,
        ttl: Option<i64>,
    ) -> Result<CreatedKey, MemKvClientError> {
        let response = self
            .http
            .post(format!("{}/v1/keys", self.root_url))
            .json(&WriteBody { value, ttl })
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED => Ok(response.json().await?),
            status => Err(unexpected(status, response).await),
        }
    }

    /// Get the value of `key`.
    ///
    /// `None` means the key is absent or expired.
    pub async fn get(&self, key: &str) -> Result<Option<KeyValue>, MemKvClientError> {
        let response = self
            .http
            .get(format!("{}/v1/keys/{}", self.root_url, key))
            .send()
            .await?;

        debug!("get {}: {}", key, response.status());

        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(unexpected(status, response).await),
        }
    }

    /// Get the remaining time-to-live of `key`.
    ///
    /// `None` means the key is absent or expired; `Some(KeyTtl { ttl: None, .. })`
    /// means the key exists and never expires.
    pub async fn get_ttl(&self, key: &str) -> Result<Option<KeyTtl>, MemKvClientError> {
        let response = self
            .http
            .get(format!("{}/v1/ttl/{}", self.root_url, key))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(unexpected(status, response).await),
        }
    }

    /// Set `key` to hold `value`, with an optional ttl in seconds.
    ///
    /// Returns `true` when the key already existed and was overwritten.
    pub async fn put(
        &self,
        key: &str,
        value: &str,
        ttl: Option<i64>,
    ) -> Result<bool, MemKvClientError> {
        let response = self
            .http
            .put(format!("{}/v1/keys/{}", self.root_url, key))
            .json(&WriteBody { value, ttl })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::CREATED => Ok(false),
            status => Err(unexpected(status, response).await),
        }
    }

    /// Delete `key`. Returns `true` when the key existed.
    pub async fn delete(&self, key: &str) -> Result<bool, MemKvClientError> {
        let response = self
            .http
            .delete(format!("{}/v1/keys/{}", self.root_url, key))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(unexpected(status, response).await),
        }
    }

    /// Publish `message` to `channel`. Succeeds even when the channel has no
    /// subscribers.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<(), MemKvClientError> {
        let response = self
            .http
            .post(format!("{}/v1/publish/{}", self.root_url, channel))
            .json(&PublishBody { message })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(unexpected(status, response).await),
        }
    }

    /// Subscribe to `channel`, returning a `Subscriber` that yields messages
    /// as they are published until the connection ends.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscriber, MemKvClientError> {
        let response = self
            .http
            .get(format!("{}/v1/subscribe/{}", self.root_url, channel))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(unexpected(status, response).await);
        }

        Ok(Subscriber::new(response))
    }
}

async fn unexpected(status: StatusCode, response: reqwest::Response) -> MemKvClientError {
    let body = response.text().await.unwrap_or_default();
    MemKvClientError::UnexpectedStatus {
        status: status.as_u16(),
        body,
    }
}
