//! Everything that runs on the secure origin.
//!
//! Three kinds of frames live here: one controller frame per container
//! (handshake, client, request handling), one element frame per collect
//! field, and one reveal frame per reveal element. Frames of the secure
//! origin find each other through the `FrameDirectory`, the way same-origin
//! windows reach each other through `window.parent.frames`.

pub mod collect_frame;
pub mod controller;
pub mod directory;
pub mod element;
pub mod field;
pub mod form;
pub mod gateway;
pub mod reveal;
pub mod token;

pub use collect_frame::CollectFrame;
pub use controller::{ControllerKind, FrameController};
pub use directory::{FrameDirectory, FrameWindow};
pub use element::FrameElement;
pub use field::{FieldEvent, FieldNotice, FieldState, FormField};
pub use form::SecureForm;
pub use gateway::RequestGateway;
pub use reveal::RevealFrame;
pub use token::BusTokenProvider;

use crate::bus::{Bus, BusEndpoint, Reply};
use crate::client::{Client, VaultTransport};
use crate::config::ControllerOptions;
use crate::error::SdkError;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

/// Client slot filled in once the handshake completes.
pub type ClientSlot = watch::Receiver<Option<Arc<Client>>>;

/// What a secure frame knows about its surroundings.
#[derive(Clone)]
pub struct SecureEnv {
    pub bus: Bus,
    /// Origin of the secure frames.
    pub origin: String,
    /// Origin of the host page; host-bound traffic is restricted to it.
    pub host_origin: String,
    pub directory: FrameDirectory,
    pub transport: Arc<dyn VaultTransport>,
    pub options: ControllerOptions,
    /// Extra attempts for transient vault failures.
    pub retries: u32,
}

impl SecureEnv {
    pub fn endpoint(&self) -> BusEndpoint {
        self.bus.endpoint(self.origin.clone())
    }

    /// Endpoint that only talks to the host page.
    pub fn to_host(&self) -> BusEndpoint {
        self.endpoint().target(self.host_origin.clone())
    }

    /// Endpoint that only talks to other secure frames.
    pub fn to_secure(&self) -> BusEndpoint {
        self.endpoint().target(self.origin.clone())
    }
}

/// Answer a bus request from a spawned task.
pub(crate) fn spawn_reply<T, F>(event: &str, reply: Option<Reply>, work: F)
where
    T: Serialize + Send + 'static,
    F: Future<Output = Result<T, SdkError>> + Send + 'static,
{
    let Some(reply) = reply else {
        warn!("{event} arrived without a reply channel");
        return;
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                reply.send_result(work.await);
            });
        }
        Err(_) => {
            reply.error(&SdkError::ChannelClosed(format!("{event}: no async runtime")));
        }
    }
}

/// Wait until the controller has built its client.
pub(crate) async fn wait_client(
    slot: &ClientSlot,
    timeout: Option<Duration>,
) -> Result<Arc<Client>, SdkError> {
    let mut slot = slot.clone();
    let ready = async move {
        let client = slot
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SdkError::ClientNotInitialized)?;
        (*client).clone().ok_or(SdkError::ClientNotInitialized)
    };
    match timeout {
        Some(limit) => tokio::time::timeout(limit, ready)
            .await
            .map_err(|_| SdkError::ClientNotInitialized)?,
        None => ready.await,
    }
}

/// Container id carried in the fragment of a frame URL.
pub fn container_id(location: &str) -> Result<String, SdkError> {
    location
        .split_once('#')
        .map(|(_, id)| id.to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SdkError::InvalidInput(format!("frame url {location} has no container id")))
}
