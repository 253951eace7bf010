//! HTTP client for the message store.
//!
//! Two calls: `GET <api_url>` lists messages waiting for the mesh, and
//! `PUT <ack_url>` with `{"id": "<_id>"}` marks one delivered. Anything other
//! than `200 OK` is a failure, and the caller leaves the message pending.

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::StatusCode;
use serde_json::json;
use tokio::time::Duration;

use crate::error::StoreError;
use crate::relay::{MessageStore, PendingMessage};

pub struct HttpStore {
    client: reqwest::Client,
    api_url: String,
    ack_url: String,
}

impl HttpStore {
    pub fn new(api_url: String, ack_url: String, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("meshrelay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_url,
            ack_url,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn ack_url(&self) -> &str {
        &self.ack_url
    }

    fn expect_ok(url: &str, status: StatusCode) -> Result<(), StoreError> {
        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(StoreError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl MessageStore for HttpStore {
    async fn fetch_pending(&self) -> Result<Vec<PendingMessage>, StoreError> {
        let response = self.client.get(&self.api_url).send().await?;
        Self::expect_ok(&self.api_url, response.status())?;
        let messages: Vec<PendingMessage> = response.json().await?;
        debug!("Fetched {} message(s) from store", messages.len());
        Ok(messages)
    }

    async fn acknowledge(&self, id: &str) -> Result<(), StoreError> {
        trace!("PUT {} id={}", self.ack_url, id);
        let response = self
            .client
            .put(&self.ack_url)
            .json(&json!({ "id": id }))
            .send()
            .await?;
        Self::expect_ok(&self.ack_url, response.status())
    }
}
