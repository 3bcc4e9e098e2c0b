//! Request handling on the secure origin.
//!
//! The gateway runs vault calls on behalf of the host and resolves frame
//! references for connection calls. Values read from collect frames and
//! values revealed for reveal frames stay inside the secure origin; the host
//! only ever gets tokens, ids and whatever the response templates leave.

use super::directory::{FrameDirectory, FrameWindow};
use super::{wait_client, ClientSlot};
use crate::bus::events::GatewayRequest;
use crate::client::Client;
use crate::connection::json::{Reference, ReferenceResolver};
use crate::connection::{self, ResolvedConnection, SoapConnectionRequest};
use crate::error::SdkError;
use crate::records::{self, DetokenizeRecord, RevealRecord, RevealSummary};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct RequestGateway {
    client: ClientSlot,
    directory: FrameDirectory,
    /// URL of the controller frame this gateway serves.
    location: String,
    timeout: Option<Duration>,
}

impl RequestGateway {
    pub fn new(
        client: ClientSlot,
        directory: FrameDirectory,
        location: &str,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            client,
            directory,
            location: location.to_string(),
            timeout,
        }
    }

    async fn client(&self) -> Result<Arc<Client>, SdkError> {
        wait_client(&self.client, self.timeout).await
    }

    /// Frame a reference points at. Without a container the frame is looked
    /// up next to this gateway's controller.
    fn frame(&self, reference: &Reference) -> Result<Arc<dyn FrameWindow>, SdkError> {
        let location = match &reference.container {
            Some(id) => {
                let frame_url = self
                    .location
                    .split_once('#')
                    .map_or(self.location.as_str(), |(url, _)| url);
                format!("{frame_url}#{id}")
            }
            None => self.location.clone(),
        };
        self.directory
            .find(&reference.frame, &location)
            .ok_or_else(|| SdkError::FrameNotFound(reference.frame.clone()))
    }

    /// Serve one vault controller request.
    pub async fn handle(&self, request: GatewayRequest) -> Result<Value, SdkError> {
        info!("gateway request {}", request.kind());
        let client = self.client().await?;
        match request {
            GatewayRequest::Insert { records, options } => {
                records::validate_insert(&records)?;
                let response = records::insert(&client, &records, &options).await?;
                Ok(serde_json::to_value(response)?)
            }
            GatewayRequest::Detokenize { records } => {
                records::validate_detokenize(&records)?;
                let response = records::detokenize(&client, &records).await?;
                Ok(serde_json::to_value(response)?)
            }
            GatewayRequest::GetById { records } => {
                records::validate_get_by_id(&records)?;
                let response = records::get_by_id(&client, &records).await?;
                Ok(serde_json::to_value(response)?)
            }
            GatewayRequest::InvokeConnection { config } => self.invoke(&client, config).await,
            GatewayRequest::InvokeSoapConnection { config } => {
                self.invoke_soap(&client, config).await
            }
        }
    }

    async fn invoke(&self, client: &Client, config: ResolvedConnection) -> Result<Value, SdkError> {
        connection::invoke(client, self, config).await
    }

    async fn invoke_soap(
        &self,
        client: &Client,
        config: SoapConnectionRequest,
    ) -> Result<Value, SdkError> {
        let xml = connection::invoke_soap(client, self, config).await?;
        Ok(Value::String(xml))
    }

    /// Detokenize for reveal frames: values are rendered into the frames,
    /// the caller gets the tokens back.
    pub async fn reveal(&self, records: &[RevealRecord]) -> Result<RevealSummary, SdkError> {
        let client = self.client().await?;
        let requests: Vec<DetokenizeRecord> = records
            .iter()
            .map(|r| DetokenizeRecord {
                token: r.token.clone(),
                redaction: r.redaction,
            })
            .collect();
        records::validate_detokenize(&requests)?;
        let response = records::detokenize(&client, &requests).await?;
        let values = records::format_records_for_iframe(&response);
        for record in records {
            let Some(value) = values.get(&record.token) else {
                continue;
            };
            match self.frame(&Reference::parse(&record.frame)) {
                Ok(frame) => frame.render(value)?,
                Err(e) => warn!("revealed value has nowhere to go: {e}"),
            }
        }
        debug!("revealed {} of {} tokens", values.len(), records.len());
        Ok(records::format_records_for_client(&response))
    }
}

#[async_trait]
impl ReferenceResolver for RequestGateway {
    async fn collect_value(&self, frame: &Reference) -> Result<String, SdkError> {
        let field = self
            .frame(frame)?
            .field()
            .ok_or_else(|| SdkError::ElementsNotMounted(frame.frame.clone()))?;
        let state = field.state();
        if !state.is_valid || !state.is_complete {
            return Err(SdkError::IncompleteInputs(field.field_name().to_string()));
        }
        Ok(field.get_unformatted_value())
    }

    async fn reveal_value(&self, frame: &Reference) -> Result<String, SdkError> {
        let token = self
            .frame(frame)?
            .reveal_token()
            .ok_or_else(|| SdkError::ElementMustHaveToken(frame.frame.clone()))?;
        let client = self.client().await?;
        let response = records::detokenize(&client, &[DetokenizeRecord::new(token.clone())]).await?;
        if let Some(error) = response.errors.first() {
            return Err(error.error.clone().into());
        }
        records::format_records_for_iframe(&response)
            .remove(&token)
            .ok_or_else(|| SdkError::Remote {
                code: 404,
                description: json!({ "token": token, "reason": "not revealed" }).to_string(),
            })
    }

    fn render(&self, frame: &Reference, value: &str) -> Result<(), SdkError> {
        self.frame(frame)?.render(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::client::tests::{fresh_token, ScriptedTransport};
    use crate::client::{ClientJson, TokenFn};
    use crate::config::ControllerOptions;
    use crate::frame::reveal::{reveal_frame_name, RevealFrame};
    use crate::frame::SecureEnv;
    use crate::records::RedactionType;
    use tokio::sync::watch;

    fn gateway(transport: Arc<ScriptedTransport>) -> (RequestGateway, SecureEnv, watch::Sender<Option<Arc<Client>>>) {
        let directory = FrameDirectory::new();
        let env = SecureEnv {
            bus: Bus::new(),
            origin: "https://secure.example".into(),
            host_origin: "https://host.example".into(),
            directory: directory.clone(),
            transport: transport.clone(),
            options: ControllerOptions::default(),
            retries: 0,
        };
        let client = Client::new(
            ClientJson {
                vault_id: "v1".into(),
                vault_url: "https://vault.example".into(),
                client_domain: "https://host.example".into(),
                uuid: "u".into(),
            },
            Arc::new(TokenFn::new(|| async { Ok(fresh_token()) })),
            transport,
        );
        let (tx, rx) = watch::channel(Some(Arc::new(client)));
        let gateway = RequestGateway::new(rx, directory, "https://secure.example/frame#c1", None);
        (gateway, env, tx)
    }

    #[tokio::test]
    async fn test_reveal_renders_into_frames() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.replies.lock().unwrap().push(Ok(json!({
            "records": [{"token": "tok-1", "value": "4111111111111111"}]
        })));
        let (gateway, env, _tx) = gateway(transport);
        let name = reveal_frame_name(Some("tok-1"), "r1");
        let frame = RevealFrame::new(&name, "https://secure.example/frame#c1", env.clone()).unwrap();
        env.directory.register(frame.clone());

        let summary = gateway
            .reveal(&[RevealRecord {
                token: "tok-1".into(),
                redaction: RedactionType::PlainText,
                frame: name,
            }])
            .await
            .unwrap();
        assert_eq!(summary.success[0].token, "tok-1");
        assert!(summary.errors.is_empty());
        assert_eq!(frame.display().as_deref(), Some("4111111111111111"));
    }

    #[tokio::test]
    async fn test_reveal_value_for_connections() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.replies.lock().unwrap().push(Ok(json!({
            "records": [{"token": "tok-9", "value": "123-45-6789"}]
        })));
        let (gateway, env, _tx) = gateway(transport);
        let name = reveal_frame_name(Some("tok-9"), "r9");
        env.directory.register(
            RevealFrame::new(&name, "https://secure.example/frame#c1", env.clone()).unwrap(),
        );
        assert_eq!(
            gateway.reveal_value(&Reference::new(name, "c1")).await.unwrap(),
            "123-45-6789"
        );
        assert!(matches!(
            gateway
                .collect_value(&Reference::new("element:cvv:card.cvv", "c1"))
                .await,
            Err(SdkError::FrameNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_references_stay_inside_their_container() {
        let (gateway, env, _tx) = gateway(Arc::new(ScriptedTransport::default()));
        let name = reveal_frame_name(None, "shared");
        let first = RevealFrame::new(&name, "https://secure.example/frame#a", env.clone()).unwrap();
        let second = RevealFrame::new(&name, "https://secure.example/frame#b", env.clone()).unwrap();
        env.directory.register(first.clone());
        env.directory.register(second.clone());

        gateway.render(&Reference::new(name.clone(), "a"), "for-a").unwrap();
        assert_eq!(first.display().as_deref(), Some("for-a"));
        assert_eq!(second.display(), None);

        assert!(matches!(
            gateway.render(&Reference::new(name, "z"), "lost"),
            Err(SdkError::FrameNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_handle_rejects_invalid_records() {
        let (gateway, _env, _tx) = gateway(Arc::new(ScriptedTransport::default()));
        let err = gateway
            .handle(GatewayRequest::Detokenize { records: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::InvalidInput(_)));
    }
}
