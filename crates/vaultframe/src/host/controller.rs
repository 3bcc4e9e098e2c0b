//! Vault operations that need no element: insert, detokenize, get by id
//! and connection calls.
//!
//! They still run on the secure origin, through a hidden vault controller
//! frame, so the bearer token and the revealed values stay out of the page.
//! Each call is validated before it waits for that frame.

use super::document::HostEnv;
use super::link::ControllerLink;
use super::registry::ElementIndex;
use crate::bus::events::{GatewayRequest, HandshakeBundle, PUREJS_REQUEST};
use crate::client::TokenProvider;
use crate::connection::{ConnectionConfig, SoapConnectionConfig};
use crate::error::SdkError;
use crate::frame::ControllerKind;
use crate::records::{
    self, DetokenizeRecord, GetByIdRecord, InsertOptions, InsertRecord, InsertResponse,
    RevealResponse,
};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub struct ExternalController {
    link: Arc<ControllerLink>,
    index: ElementIndex,
}

impl ExternalController {
    pub(crate) fn new(
        env: HostEnv,
        bundle: HandshakeBundle,
        provider: Arc<dyn TokenProvider>,
        index: ElementIndex,
    ) -> Result<Self, SdkError> {
        let container_id = Uuid::new_v4().to_string();
        let link = ControllerLink::new(env, ControllerKind::Vault, &container_id, bundle, provider)?;
        Ok(Self { link, index })
    }

    pub fn is_ready(&self) -> bool {
        self.link.is_ready()
    }

    pub async fn insert(
        &self,
        records: Vec<InsertRecord>,
        options: InsertOptions,
    ) -> Result<InsertResponse, SdkError> {
        records::validate_insert(&records)?;
        self.link
            .request(PUREJS_REQUEST, &GatewayRequest::Insert { records, options })
            .await
    }

    pub async fn detokenize(&self, records: Vec<DetokenizeRecord>) -> Result<RevealResponse, SdkError> {
        records::validate_detokenize(&records)?;
        self.link
            .request(PUREJS_REQUEST, &GatewayRequest::Detokenize { records })
            .await
    }

    pub async fn get_by_id(&self, records: Vec<GetByIdRecord>) -> Result<RevealResponse, SdkError> {
        records::validate_get_by_id(&records)?;
        self.link
            .request(PUREJS_REQUEST, &GatewayRequest::GetById { records })
            .await
    }

    /// Call a REST connection. Element values are swapped in on the secure
    /// side; response values routed to reveal elements are rendered there
    /// and left out of the returned body.
    pub async fn invoke_connection(&self, config: &ConnectionConfig) -> Result<Value, SdkError> {
        let config = config.resolve()?;
        self.link
            .request(PUREJS_REQUEST, &GatewayRequest::InvokeConnection { config })
            .await
    }

    /// Call a SOAP connection and return the response XML.
    pub async fn invoke_soap_connection(
        &self,
        config: &SoapConnectionConfig,
    ) -> Result<String, SdkError> {
        let config = config.resolve(&self.index)?;
        let reply: Value = self
            .link
            .request(PUREJS_REQUEST, &GatewayRequest::InvokeSoapConnection { config })
            .await?;
        match reply {
            Value::String(xml) => Ok(xml),
            other => Ok(other.to_string()),
        }
    }
}
