//! Host end of one controller frame.
//!
//! A link inserts the hidden controller frame, answers its readiness
//! handshake with the client metadata and serves its bearer token requests.
//! Every container operation goes through `request`: validate first, wait
//! for the handshake, then emit and wait for the reply.

use super::document::{HostEnv, IframeSpec};
use crate::bus::events::{scoped, BearerTokenReply, FrameReady, HandshakeBundle, GET_BEARER_TOKEN};
use crate::bus::Subscription;
use crate::client::TokenProvider;
use crate::error::SdkError;
use crate::frame::{spawn_reply, ControllerKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

pub struct ControllerLink {
    kind: ControllerKind,
    container_id: String,
    frame_name: String,
    env: HostEnv,
    ready: watch::Receiver<bool>,
    _subscriptions: Vec<Subscription>,
}

impl ControllerLink {
    /// Arm the handshake responders, then insert the controller frame.
    pub fn new(
        env: HostEnv,
        kind: ControllerKind,
        container_id: &str,
        bundle: HandshakeBundle,
        provider: Arc<dyn TokenProvider>,
    ) -> Result<Arc<Self>, SdkError> {
        let frame_name = kind.frame_name(container_id);
        let (ready_tx, ready) = watch::channel(false);
        let secure = env.secure();
        let mut subscriptions = Vec::new();

        let name = frame_name.clone();
        subscriptions.push(secure.on(
            &scoped(kind.ready_event(), container_id),
            move |msg, reply| {
                let Ok(frame) = msg.payload_as::<FrameReady>() else {
                    return;
                };
                let Some(reply) = reply else {
                    return;
                };
                if frame.name != name {
                    return;
                }
                if reply.send_result(Ok(&bundle)) {
                    ready_tx.send_replace(true);
                    info!("{name} completed its handshake");
                }
            },
        ));

        subscriptions.push(secure.on(&scoped(GET_BEARER_TOKEN, container_id), move |_, reply| {
            let provider = provider.clone();
            spawn_reply(GET_BEARER_TOKEN, reply, async move {
                provider
                    .bearer_token()
                    .await
                    .map(|value| BearerTokenReply::Value { value })
                    .map_err(SdkError::BearerToken)
            });
        }));

        let link = Arc::new(Self {
            kind,
            container_id: container_id.to_string(),
            frame_name: frame_name.clone(),
            env: env.clone(),
            ready,
            _subscriptions: subscriptions,
        });
        env.document.attach_hidden(IframeSpec {
            name: frame_name,
            src: env.frame_src(container_id),
            hidden: true,
        })?;
        Ok(link)
    }

    pub fn kind(&self) -> ControllerKind {
        self.kind
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn frame_name(&self) -> &str {
        &self.frame_name
    }

    pub fn env(&self) -> &HostEnv {
        &self.env
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait for the controller's handshake, bounded by `ready_timeout`.
    pub async fn wait_ready(&self) -> Result<(), SdkError> {
        let mut ready = self.ready.clone();
        let wait = async move {
            ready
                .wait_for(|r| *r)
                .await
                .map(|_| ())
                .map_err(|_| SdkError::ChannelClosed(self.frame_name.clone()))
        };
        match self.env.options.ready_timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| SdkError::Timeout(self.frame_name.clone()))?,
            None => wait.await,
        }
    }

    /// Round trip to the controller once it is ready.
    pub async fn request<T, R>(&self, event: &str, payload: &T) -> Result<R, SdkError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        self.wait_ready().await?;
        debug!("{} -> {}", event, self.frame_name);
        self.env
            .secure()
            .call(
                &scoped(event, &self.container_id),
                payload,
                self.env.options.request_timeout,
            )
            .await
    }

    /// Fire and forget, ready or not.
    pub fn emit<T: Serialize>(&self, event: &str, payload: &T) -> usize {
        self.env
            .secure()
            .emit_as(&scoped(event, &self.container_id), payload)
    }
}

impl Drop for ControllerLink {
    fn drop(&mut self) {
        self.env
            .document
            .remove_frame(&self.frame_name, &self.env.frame_src(&self.container_id));
    }
}
