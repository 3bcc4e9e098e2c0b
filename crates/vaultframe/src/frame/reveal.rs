//! Reveal frame: displays one detokenized value.
//!
//! The frame name carries the token, so the frame knows what it shows
//! without asking. Revealed values arrive through `render` from the reveal
//! controller and are never sent back to the host.

use super::directory::FrameWindow;
use super::{container_id, SecureEnv};
use crate::bus::events::{scoped, FrameReady, RevealBoot, FRAME_READY, FRAME_REVEAL};
use crate::error::SdkError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Shown {
    boot: RevealBoot,
    value: Option<String>,
}

pub struct RevealFrame {
    name: String,
    location: String,
    container_id: String,
    token: Option<String>,
    env: SecureEnv,
    shown: Mutex<Shown>,
}

/// `reveal:<base64 token>:<id>`. An empty token segment means no token.
pub fn reveal_frame_name(token: Option<&str>, id: &str) -> String {
    let encoded = token.map(|t| STANDARD.encode(t)).unwrap_or_default();
    format!("{FRAME_REVEAL}:{encoded}:{id}")
}

fn parse_token(name: &str) -> Result<Option<String>, SdkError> {
    let (encoded, _) = name
        .strip_prefix(FRAME_REVEAL)
        .and_then(|r| r.strip_prefix(':'))
        .and_then(|r| r.rsplit_once(':'))
        .ok_or_else(|| SdkError::FrameNotFound(name.to_string()))?;
    if encoded.is_empty() {
        return Ok(None);
    }
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| SdkError::InvalidInput(format!("reveal frame {name}: {e}")))?;
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| SdkError::InvalidInput(format!("reveal frame {name}: {e}")))
}

impl RevealFrame {
    pub fn new(name: &str, location: &str, env: SecureEnv) -> Result<Arc<Self>, SdkError> {
        Ok(Arc::new(Self {
            name: name.to_string(),
            location: location.to_string(),
            container_id: container_id(location)?,
            token: parse_token(name)?,
            env,
            shown: Mutex::new(Shown::default()),
        }))
    }

    fn shown(&self) -> MutexGuard<'_, Shown> {
        self.shown.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register with the directory and fetch label and alt text.
    pub async fn load(self: &Arc<Self>) -> Result<(), SdkError> {
        self.env.directory.register(self.clone());
        let boot: RevealBoot = self
            .env
            .to_host()
            .call(
                &scoped(FRAME_READY, &self.container_id),
                &FrameReady {
                    name: self.name.clone(),
                },
                self.env.options.ready_timeout,
            )
            .await?;
        self.shown().boot = boot;
        Ok(())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn label(&self) -> Option<String> {
        self.shown().boot.label.clone()
    }

    /// Revealed value, else the alt text, else the token itself.
    pub fn display(&self) -> Option<String> {
        let shown = self.shown();
        shown
            .value
            .clone()
            .or_else(|| shown.boot.alt_text.clone())
            .or_else(|| self.token.clone())
    }

    pub fn is_revealed(&self) -> bool {
        self.shown().value.is_some()
    }
}

impl FrameWindow for RevealFrame {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn render(&self, value: &str) -> Result<(), SdkError> {
        self.shown().value = Some(value.to_string());
        Ok(())
    }

    fn reveal_token(&self) -> Option<String> {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_name_carries_token() {
        let name = reveal_frame_name(Some("4017-0000-1111"), "r1");
        assert!(name.starts_with("reveal:"));
        assert_eq!(parse_token(&name).unwrap().as_deref(), Some("4017-0000-1111"));

        let empty = reveal_frame_name(None, "r2");
        assert_eq!(empty, "reveal::r2");
        assert_eq!(parse_token(&empty).unwrap(), None);
        assert!(parse_token("element:cvv:x").is_err());
    }
}
