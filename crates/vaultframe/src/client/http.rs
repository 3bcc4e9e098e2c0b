//! reqwest-backed `VaultTransport`.

use super::transport::{RequestMethod, TransportError, VaultRequest, VaultTransport};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Talks to the vault REST API (and connection gateways) over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

fn is_xml(request: &VaultRequest) -> bool {
    request
        .headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("content-type") && v.contains("xml"))
}

/// Pull a message out of an error body, accepting both the vault's
/// `{error: {http_code, message}}` envelope and plain text.
fn error_message(text: &str, status: reqwest::StatusCode) -> String {
    if let Ok(body) = serde_json::from_str::<Value>(text) {
        let message = body
            .pointer("/error/message")
            .or_else(|| body.get("message"))
            .and_then(Value::as_str);
        if let Some(message) = message {
            return message.to_string();
        }
    }
    if text.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        text.to_string()
    }
}

#[async_trait]
impl VaultTransport for HttpTransport {
    async fn send(&self, request: VaultRequest) -> Result<Value, TransportError> {
        let method = match request.method {
            RequestMethod::Get => reqwest::Method::GET,
            RequestMethod::Post => reqwest::Method::POST,
            RequestMethod::Put => reqwest::Method::PUT,
            RequestMethod::Patch => reqwest::Method::PATCH,
            RequestMethod::Delete => reqwest::Method::DELETE,
        };
        debug!("{} {}", request.method.as_str(), request.url);

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(self.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            Some(Value::String(text)) if is_xml(&request) => builder.body(text.clone()),
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| TransportError {
            http_code: e.status().map(|s| s.as_u16()).unwrap_or(0),
            message: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| TransportError {
            http_code: status.as_u16(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(TransportError {
                http_code: status.as_u16(),
                message: error_message(&text, status),
            });
        }

        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}
