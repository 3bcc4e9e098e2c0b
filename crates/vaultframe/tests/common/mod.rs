//! Shared helpers for the integration tests: a scripted vault and a page
//! with a few mount points.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use vaultframe::client::{TransportError, VaultRequest};
use vaultframe::{ClientConfig, HeadlessBrowser, TokenFn, VaultFrames, VaultTransport};

pub const VAULT_ID: &str = "vault1";
pub const VAULT_URL: &str = "https://vault.example";

/// A JWT valid for an hour; the signature is never checked client side.
pub fn fresh_token() -> String {
    let exp = chrono::Utc::now().timestamp() + 3600;
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
        URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#))
    )
}

/// Vault that answers with queued replies and records every request.
#[derive(Default)]
pub struct MockVault {
    replies: Mutex<VecDeque<Result<Value, TransportError>>>,
    seen: Mutex<Vec<VaultRequest>>,
}

impl MockVault {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, value: Value) {
        self.replies.lock().unwrap().push_back(Ok(value));
    }

    pub fn fail(&self, http_code: u16, message: &str) {
        self.replies.lock().unwrap().push_back(Err(TransportError {
            http_code,
            message: message.to_string(),
        }));
    }

    pub fn seen(&self) -> Vec<VaultRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl VaultTransport for MockVault {
    async fn send(&self, request: VaultRequest) -> Result<Value, TransportError> {
        self.seen.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(TransportError {
                    http_code: 500,
                    message: "no reply queued".to_string(),
                })
            })
    }
}

pub fn config() -> ClientConfig {
    ClientConfig::new(
        VAULT_ID,
        VAULT_URL,
        Arc::new(TokenFn::new(|| async { Ok(fresh_token()) })),
    )
}

/// A page with the given mount points, backed by `vault`.
pub fn page(vault: &Arc<MockVault>, nodes: &[&str]) -> Arc<HeadlessBrowser> {
    let page = HeadlessBrowser::new(vault.clone());
    for node in nodes {
        page.add_node(node);
    }
    Arc::new(page)
}

pub fn sdk(page: &Arc<HeadlessBrowser>) -> VaultFrames {
    VaultFrames::init(config(), page.clone()).unwrap()
}
