//! Controller frames: one hidden frame per container.
//!
//! A controller announces itself to the host, receives the client metadata
//! in reply and rebuilds the vault client on its side of the boundary. The
//! collect controller then drives its `SecureForm`; the reveal and vault
//! controllers answer requests through a `RequestGateway`.

use super::form::SecureForm;
use super::gateway::RequestGateway;
use super::token::BusTokenProvider;
use super::{container_id, spawn_reply, SecureEnv};
use crate::bus::events::{
    scoped, FrameReady, GatewayRequest, HandshakeBundle, RevealRequest, COLLECT_CONTROLLER,
    FRAME_READY, PUREJS_FRAME_READY, PUREJS_REQUEST, REVEAL_CONTROLLER, REVEAL_REQUEST,
    VAULT_CONTROLLER,
};
use crate::bus::Subscription;
use crate::client::Client;
use crate::error::SdkError;
use crate::logging;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    Collect,
    Reveal,
    Vault,
}

impl ControllerKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            ControllerKind::Collect => COLLECT_CONTROLLER,
            ControllerKind::Reveal => REVEAL_CONTROLLER,
            ControllerKind::Vault => VAULT_CONTROLLER,
        }
    }

    /// Kind of the controller frame called `name`.
    pub fn from_frame_name(name: &str) -> Result<Self, SdkError> {
        let prefix = name.split_once(':').map_or(name, |(p, _)| p);
        match prefix {
            COLLECT_CONTROLLER => Ok(ControllerKind::Collect),
            REVEAL_CONTROLLER => Ok(ControllerKind::Reveal),
            VAULT_CONTROLLER => Ok(ControllerKind::Vault),
            _ => Err(SdkError::FrameNotFound(name.to_string())),
        }
    }

    pub fn frame_name(&self, container_id: &str) -> String {
        scoped(self.prefix(), container_id)
    }

    /// Event the controller announces itself with.
    pub fn ready_event(&self) -> &'static str {
        match self {
            ControllerKind::Vault => PUREJS_FRAME_READY,
            _ => FRAME_READY,
        }
    }
}

pub struct FrameController {
    name: String,
    kind: ControllerKind,
    container_id: String,
    env: SecureEnv,
    client: watch::Sender<Option<Arc<Client>>>,
    form: Option<Arc<SecureForm>>,
    gateway: RequestGateway,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl FrameController {
    pub fn new(name: &str, location: &str, env: SecureEnv) -> Result<Arc<Self>, SdkError> {
        let kind = ControllerKind::from_frame_name(name)?;
        let container_id = container_id(location)?;
        let (client, slot) = watch::channel(None);
        let form = (kind == ControllerKind::Collect)
            .then(|| SecureForm::new(env.clone(), &container_id, location, slot.clone()));
        let gateway = RequestGateway::new(
            slot,
            env.directory.clone(),
            location,
            env.options.request_timeout,
        );
        let controller = Arc::new(Self {
            name: name.to_string(),
            kind,
            container_id,
            env,
            client,
            form,
            gateway,
            subscriptions: Mutex::new(Vec::new()),
        });
        controller.listen();
        Ok(controller)
    }

    fn listen(&self) {
        let to_host = self.env.to_host();
        let gateway = self.gateway.clone();
        let sub = match self.kind {
            ControllerKind::Collect => return,
            ControllerKind::Reveal => {
                to_host.on(&scoped(REVEAL_REQUEST, &self.container_id), move |msg, reply| {
                    let gateway = gateway.clone();
                    let request = msg.payload_as::<RevealRequest>();
                    spawn_reply(REVEAL_REQUEST, reply, async move {
                        gateway.reveal(&request?.records).await
                    });
                })
            }
            ControllerKind::Vault => {
                to_host.on(&scoped(PUREJS_REQUEST, &self.container_id), move |msg, reply| {
                    let gateway = gateway.clone();
                    let request = msg.payload_as::<GatewayRequest>();
                    spawn_reply(PUREJS_REQUEST, reply, async move {
                        gateway.handle(request?).await
                    });
                })
            }
        };
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sub);
    }

    /// Readiness handshake: announce, receive metadata, build the client.
    pub async fn load(&self) -> Result<(), SdkError> {
        let bundle: HandshakeBundle = self
            .env
            .to_host()
            .call(
                &scoped(self.kind.ready_event(), &self.container_id),
                &FrameReady {
                    name: self.name.clone(),
                },
                self.env.options.ready_timeout,
            )
            .await?;
        logging::init(bundle.context.log_level);
        if bundle.client.client_domain != self.env.host_origin {
            warn!(
                "client domain {} differs from host origin {}",
                bundle.client.client_domain, self.env.host_origin
            );
        }

        let provider = Arc::new(BusTokenProvider::new(
            self.env.to_host(),
            &self.container_id,
            self.env.options.request_timeout,
        ));
        let client = Client::new(bundle.client.clone(), provider, self.env.transport.clone())
            .with_retries(self.env.retries);
        self.client.send_replace(Some(Arc::new(client)));
        info!("{} connected to vault {}", self.name, bundle.client.vault_id);

        if let Some(form) = &self.form {
            form.set_metadata(bundle);
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ControllerKind {
        self.kind
    }

    pub fn form(&self) -> Option<&Arc<SecureForm>> {
        self.form.as_ref()
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    pub fn client(&self) -> Option<Arc<Client>> {
        self.client.borrow().clone()
    }
}
