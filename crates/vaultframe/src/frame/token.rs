//! Bearer tokens for the secure side, fetched from the host over the bus.

use crate::bus::events::{scoped, BearerTokenReply, GET_BEARER_TOKEN};
use crate::bus::BusEndpoint;
use crate::client::TokenProvider;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Asks the host page's token function for a token. The function itself
/// never leaves the host.
pub struct BusTokenProvider {
    to_host: BusEndpoint,
    event: String,
    timeout: Option<Duration>,
}

impl BusTokenProvider {
    pub fn new(to_host: BusEndpoint, container_id: &str, timeout: Option<Duration>) -> Self {
        Self {
            to_host,
            event: scoped(GET_BEARER_TOKEN, container_id),
            timeout,
        }
    }
}

#[async_trait]
impl TokenProvider for BusTokenProvider {
    async fn bearer_token(&self) -> Result<String, String> {
        let reply: BearerTokenReply = self
            .to_host
            .call(&self.event, &json!({}), self.timeout)
            .await
            .map_err(|e| e.description())?;
        match reply {
            BearerTokenReply::Value { value } => Ok(value),
            BearerTokenReply::Error { error } => Err(error.description()),
        }
    }
}
