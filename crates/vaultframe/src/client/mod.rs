//! Vault client: credentials, token cache and request signing.
//!
//! A `Client` lives on the secure origin. It is rebuilt there from the
//! serializable `ClientJson` the host hands over during the handshake, so the
//! host's token function never crosses a frame boundary; the secure side asks
//! for tokens over the bus instead (see `frame::token`).

pub mod http;
pub mod jwt;
pub mod transport;

pub use http::HttpTransport;
pub use transport::{RequestMethod, TransportError, VaultRequest, VaultTransport};

use crate::error::SdkError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Source of bearer tokens. Errors are plain strings since they come from
/// user code.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, String>;
}

/// Adapts an async closure into a `TokenProvider`.
pub struct TokenFn<F>(F);

impl<F> TokenFn<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> TokenProvider for TokenFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, String>> + Send + 'static,
{
    async fn bearer_token(&self) -> Result<String, String> {
        (self.0)().await
    }
}

/// The serializable half of a client, handed to secure frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientJson {
    pub vault_id: String,
    pub vault_url: String,
    /// Origin of the host page; secure frames only accept requests from it.
    pub client_domain: String,
    /// Per-init identifier, used to scope bus events of one SDK instance.
    pub uuid: String,
}

pub struct Client {
    json: ClientJson,
    provider: Arc<dyn TokenProvider>,
    transport: Arc<dyn VaultTransport>,
    token: Mutex<Option<String>>,
    max_retries: u32,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("json", &self.json)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(
        json: ClientJson,
        provider: Arc<dyn TokenProvider>,
        transport: Arc<dyn VaultTransport>,
    ) -> Self {
        Self {
            json,
            provider,
            transport,
            token: Mutex::new(None),
            max_retries: 0,
        }
    }

    /// Retry transient transport failures up to `n` extra times.
    pub fn with_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn json(&self) -> &ClientJson {
        &self.json
    }

    pub fn vault_id(&self) -> &str {
        &self.json.vault_id
    }

    pub fn vault_url(&self) -> &str {
        self.json.vault_url.trim_end_matches('/')
    }

    /// Current bearer token, refreshed from the provider when absent or
    /// expired.
    pub async fn bearer_token(&self) -> Result<String, SdkError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if jwt::is_token_valid(token) {
                return Ok(token.clone());
            }
            debug!("cached bearer token expired, refreshing");
        }

        let token = self
            .provider
            .bearer_token()
            .await
            .map_err(SdkError::BearerToken)?;
        if !jwt::is_token_valid(&token) {
            return Err(SdkError::BearerToken(
                "provider returned an expired or malformed token".into(),
            ));
        }
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Send a request to the vault with the bearer token attached.
    pub async fn request(&self, request: VaultRequest) -> Result<Value, SdkError> {
        let token = self.bearer_token().await?;
        let request = request.header("Authorization", format!("Bearer {token}"));
        self.send(request).await
    }

    /// Send a request to a connection gateway. The token travels in the
    /// gateway's own header so the target service never sees it.
    pub async fn request_connection(&self, request: VaultRequest) -> Result<Value, SdkError> {
        let token = self.bearer_token().await?;
        let request = request.header("X-Skyflow-Authorization", token);
        self.send(request).await
    }

    async fn send(&self, request: VaultRequest) -> Result<Value, SdkError> {
        let mut attempt = 0;
        loop {
            match self.transport.send(request.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let err = SdkError::from(e);
                    if attempt >= self.max_retries || !err.is_transient() {
                        return Err(err);
                    }
                    attempt += 1;
                    warn!("transient vault error ({err}), retry {attempt}/{}", self.max_retries);
                    tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
                }
            }
        }
    }
}
