//! The vault transport seam.
//!
//! The core never speaks HTTP directly. It builds a `VaultRequest` and hands
//! it to whatever `VaultTransport` the embedding supplied.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Patch => "PATCH",
            RequestMethod::Delete => "DELETE",
        }
    }
}

impl std::str::FromStr for RequestMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(RequestMethod::Get),
            "POST" => Ok(RequestMethod::Post),
            "PUT" => Ok(RequestMethod::Put),
            "PATCH" => Ok(RequestMethod::Patch),
            "DELETE" => Ok(RequestMethod::Delete),
            other => Err(format!("unsupported method {other}")),
        }
    }
}

/// `{method, url, body}` plus headers.
///
/// A `Value::String` body goes out verbatim when the request carries an XML
/// content type (SOAP envelopes); every other body, strings included, is
/// sent as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultRequest {
    pub method: RequestMethod,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl VaultRequest {
    pub fn new(method: RequestMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// `{error: {http_code, message}}` as produced by the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{http_code}] {message}")]
pub struct TransportError {
    pub http_code: u16,
    pub message: String,
}

impl From<TransportError> for crate::error::SdkError {
    fn from(e: TransportError) -> Self {
        crate::error::SdkError::Transport {
            http_code: e.http_code,
            message: e.message,
        }
    }
}

#[async_trait]
pub trait VaultTransport: Send + Sync {
    /// Perform one request. Success yields the parsed JSON body, or a
    /// `Value::String` when the response is not JSON.
    async fn send(&self, request: VaultRequest) -> Result<Value, TransportError>;
}
