//! `VaultFrames`: the page's entry point.

use super::container::CollectContainer;
use super::controller::ExternalController;
use super::document::{Document, HostEnv};
use super::link::ControllerLink;
use super::registry::ElementIndex;
use super::reveal::RevealContainer;
use crate::bus::events::HandshakeBundle;
use crate::client::{ClientJson, TokenProvider};
use crate::config::{ClientConfig, ControllerOptions};
use crate::connection::{ConnectionConfig, SoapConnectionConfig};
use crate::error::SdkError;
use crate::frame::ControllerKind;
use crate::logging;
use crate::records::{
    DetokenizeRecord, GetByIdRecord, InsertOptions, InsertRecord, InsertResponse, RevealResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerType {
    Collect,
    Reveal,
}

impl std::str::FromStr for ContainerType {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "COLLECT" => Ok(ContainerType::Collect),
            "REVEAL" => Ok(ContainerType::Reveal),
            _ => Err(SdkError::InvalidInput(format!("unknown container type {s}"))),
        }
    }
}

pub enum Container {
    Collect(CollectContainer),
    Reveal(RevealContainer),
}

impl Container {
    pub fn id(&self) -> &str {
        match self {
            Container::Collect(c) => c.id(),
            Container::Reveal(c) => c.id(),
        }
    }

    pub fn into_collect(self) -> Option<CollectContainer> {
        match self {
            Container::Collect(c) => Some(c),
            Container::Reveal(_) => None,
        }
    }

    pub fn into_reveal(self) -> Option<RevealContainer> {
        match self {
            Container::Reveal(c) => Some(c),
            Container::Collect(_) => None,
        }
    }
}

/// One initialized SDK instance bound to one page.
pub struct VaultFrames {
    env: HostEnv,
    bundle: HandshakeBundle,
    provider: Arc<dyn TokenProvider>,
    index: ElementIndex,
    vault: ExternalController,
}

impl std::fmt::Debug for VaultFrames {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultFrames")
            .field("vault_id", &self.bundle.client.vault_id)
            .finish_non_exhaustive()
    }
}

impl VaultFrames {
    /// Validate the config and insert the hidden vault controller frame.
    pub fn init(config: ClientConfig, document: Arc<dyn Document>) -> Result<Self, SdkError> {
        config.validate()?;
        logging::init(config.context.log_level);
        let provider = config
            .token_provider
            .clone()
            .ok_or_else(|| SdkError::InvalidConfig("a bearer token provider is required".into()))?;
        let env = HostEnv::new(document, config.options);
        let bundle = HandshakeBundle {
            client: ClientJson {
                vault_id: config.vault_id.clone(),
                vault_url: config.normalized_vault_url(),
                client_domain: env.document.origin(),
                uuid: Uuid::new_v4().to_string(),
            },
            context: config.context.clone(),
        };
        let index = ElementIndex::new();
        let vault = ExternalController::new(
            env.clone(),
            bundle.clone(),
            provider.clone(),
            index.clone(),
        )?;
        info!("initialized for vault {}", config.vault_id);
        Ok(Self {
            env,
            bundle,
            provider,
            index,
            vault,
        })
    }

    pub fn options(&self) -> ControllerOptions {
        self.env.options
    }

    fn link(&self, kind: ControllerKind) -> Result<Arc<ControllerLink>, SdkError> {
        ControllerLink::new(
            self.env.clone(),
            kind,
            &Uuid::new_v4().to_string(),
            self.bundle.clone(),
            self.provider.clone(),
        )
    }

    /// New container with its own controller frame.
    pub fn container(&self, kind: ContainerType) -> Result<Container, SdkError> {
        Ok(match kind {
            ContainerType::Collect => Container::Collect(self.collect_container()?),
            ContainerType::Reveal => Container::Reveal(self.reveal_container()?),
        })
    }

    pub fn collect_container(&self) -> Result<CollectContainer, SdkError> {
        let link = self.link(ControllerKind::Collect)?;
        Ok(CollectContainer::new(link, self.index.clone()))
    }

    pub fn reveal_container(&self) -> Result<RevealContainer, SdkError> {
        let link = self.link(ControllerKind::Reveal)?;
        Ok(RevealContainer::new(link, self.index.clone()))
    }

    pub async fn insert(
        &self,
        records: Vec<InsertRecord>,
        options: InsertOptions,
    ) -> Result<InsertResponse, SdkError> {
        self.vault.insert(records, options).await
    }

    pub async fn detokenize(&self, records: Vec<DetokenizeRecord>) -> Result<RevealResponse, SdkError> {
        self.vault.detokenize(records).await
    }

    pub async fn get_by_id(&self, records: Vec<GetByIdRecord>) -> Result<RevealResponse, SdkError> {
        self.vault.get_by_id(records).await
    }

    pub async fn invoke_connection(&self, config: &ConnectionConfig) -> Result<Value, SdkError> {
        self.vault.invoke_connection(config).await
    }

    pub async fn invoke_soap_connection(
        &self,
        config: &SoapConnectionConfig,
    ) -> Result<String, SdkError> {
        self.vault.invoke_soap_connection(config).await
    }
}
