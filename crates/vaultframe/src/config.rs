//! Client configuration and the context shared with the secure frames.
//!
//! A `ClientConfig` is validated once by `VaultFrames::init`; after that the
//! serializable parts (`ClientJson`, `Context`) are handed to every secure
//! frame during the readiness handshake.

use crate::client::TokenProvider;
use crate::error::SdkError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Minimum severity written by the SDK's tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    #[default]
    Error,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Deployment environment. `Dev` relaxes nothing security related; it only
/// makes diagnostics more verbose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Env {
    Dev,
    #[default]
    Prod,
}

/// Context shared by the host and every secure frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub env: Env,
}

/// Timeouts applied by the controllers.
///
/// `None` means wait indefinitely: a container whose secure frame never
/// announces itself keeps its callers pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Bound on the readiness handshake wait.
    pub ready_timeout: Option<Duration>,
    /// Bound on each bus round trip once ready.
    pub request_timeout: Option<Duration>,
}

/// Everything `VaultFrames::init` needs.
#[derive(Clone)]
pub struct ClientConfig {
    pub vault_id: String,
    pub vault_url: String,
    pub token_provider: Option<Arc<dyn TokenProvider>>,
    pub context: Context,
    pub options: ControllerOptions,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("vault_id", &self.vault_id)
            .field("vault_url", &self.vault_url)
            .field("token_provider", &self.token_provider.is_some())
            .field("context", &self.context)
            .field("options", &self.options)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(
        vault_id: impl Into<String>,
        vault_url: impl Into<String>,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            vault_id: vault_id.into(),
            vault_url: vault_url.into(),
            token_provider: Some(token_provider),
            context: Context::default(),
            options: ControllerOptions::default(),
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    /// Reject configs that could never reach a vault.
    ///
    /// The vault URL must be an absolute `https` URL; a trailing slash is
    /// tolerated and stripped by `normalized_vault_url`.
    pub fn validate(&self) -> Result<(), SdkError> {
        if self.vault_id.trim().is_empty() {
            return Err(SdkError::InvalidConfig("vault id is required".into()));
        }
        if self.token_provider.is_none() {
            return Err(SdkError::InvalidConfig(
                "a bearer token provider is required".into(),
            ));
        }
        let parsed = url::Url::parse(&self.vault_url)
            .map_err(|e| SdkError::InvalidConfig(format!("vault url: {e}")))?;
        if parsed.scheme() != "https" {
            return Err(SdkError::InvalidConfig(format!(
                "vault url must use https, got {}",
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none() {
            return Err(SdkError::InvalidConfig("vault url has no host".into()));
        }
        Ok(())
    }

    pub fn normalized_vault_url(&self) -> String {
        self.vault_url.trim_end_matches('/').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TokenFn;

    fn provider() -> Arc<dyn TokenProvider> {
        Arc::new(TokenFn::new(|| async { Ok("token".to_string()) }))
    }

    #[test]
    fn test_valid_config() {
        let config = ClientConfig::new("vault1", "https://demo.vault.example/", provider());
        assert!(config.validate().is_ok());
        assert_eq!(config.normalized_vault_url(), "https://demo.vault.example");
    }

    #[test]
    fn test_rejects_bad_configs() {
        let no_id = ClientConfig::new(" ", "https://demo.vault.example", provider());
        assert!(matches!(no_id.validate(), Err(SdkError::InvalidConfig(_))));

        let plain_http = ClientConfig::new("v", "http://demo.vault.example", provider());
        assert!(matches!(plain_http.validate(), Err(SdkError::InvalidConfig(_))));

        let relative = ClientConfig::new("v", "/vault", provider());
        assert!(matches!(relative.validate(), Err(SdkError::InvalidConfig(_))));

        let mut no_provider = ClientConfig::new("v", "https://demo.vault.example", provider());
        no_provider.token_provider = None;
        assert!(matches!(no_provider.validate(), Err(SdkError::InvalidConfig(_))));
    }

    #[test]
    fn test_context_defaults() {
        let ctx: Context = serde_json::from_str("{}").unwrap();
        assert_eq!(ctx.log_level, LogLevel::Error);
        assert_eq!(ctx.env, Env::Prod);

        let ctx: Context = serde_json::from_str(r#"{"logLevel":"DEBUG","env":"DEV"}"#).unwrap();
        assert_eq!(ctx.log_level.directive(), "debug");
    }
}
