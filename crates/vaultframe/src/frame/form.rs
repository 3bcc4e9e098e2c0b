//! Form aggregator of a collect controller.
//!
//! The form owns one `FormField` per element frame of its container and is
//! the only place that ever sees every collected value at once. Element
//! frames that announce themselves before the handshake completes are
//! queued and initialized, in order, once the metadata arrives.

use super::field::FormField;
use super::{spawn_reply, wait_client, ClientSlot, SecureEnv};
use crate::bus::events::{
    scoped, DestroyFrame, FrameReady, HandshakeBundle, TokenizationRequest, DESTROY_FRAME,
    FRAME_ELEMENT, FRAME_READY, TOKENIZATION_REQUEST,
};
use crate::bus::Subscription;
use crate::elements::ElementType;
use crate::error::SdkError;
use crate::records::{self, CollectOptions, InsertOptions, InsertResponse};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Default)]
struct FormState {
    /// In registration order, which is the order checkbox values collect in.
    fields: Vec<Arc<FormField>>,
    metadata: Option<HandshakeBundle>,
    /// Frames that announced themselves before the metadata arrived.
    pending: Vec<String>,
}

pub struct SecureForm {
    env: SecureEnv,
    container_id: String,
    /// URL the container's frames are loaded from.
    location: String,
    client: ClientSlot,
    state: Mutex<FormState>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl SecureForm {
    pub fn new(
        env: SecureEnv,
        container_id: &str,
        location: &str,
        client: ClientSlot,
    ) -> Arc<Self> {
        let form = Arc::new(Self {
            env,
            container_id: container_id.to_string(),
            location: location.to_string(),
            client,
            state: Mutex::new(FormState::default()),
            subscriptions: Mutex::new(Vec::new()),
        });
        form.listen();
        form
    }

    fn lock(&self) -> MutexGuard<'_, FormState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn listen(self: &Arc<Self>) {
        let mut subs = Vec::new();
        let to_secure = self.env.to_secure();
        let to_host = self.env.to_host();

        let weak = Arc::downgrade(self);
        subs.push(to_secure.on(&scoped(FRAME_READY, &self.container_id), move |msg, _| {
            let Some(form) = weak.upgrade() else { return };
            let Ok(ready) = msg.payload_as::<FrameReady>() else {
                return;
            };
            if !ready.name.starts_with(FRAME_ELEMENT) {
                return;
            }
            form.frame_ready(&ready.name);
        }));

        let weak = Arc::downgrade(self);
        subs.push(to_host.on(
            &scoped(TOKENIZATION_REQUEST, &self.container_id),
            move |msg, reply| {
                let Some(form) = weak.upgrade() else { return };
                let request = msg.payload_as::<TokenizationRequest>();
                spawn_reply(TOKENIZATION_REQUEST, reply, async move {
                    form.tokenize(&request?.options).await
                });
            },
        ));

        let weak = Arc::downgrade(self);
        subs.push(to_host.on(&scoped(DESTROY_FRAME, &self.container_id), move |msg, reply| {
            let Some(form) = weak.upgrade() else { return };
            if let Ok(DestroyFrame { name }) = msg.payload_as::<DestroyFrame>() {
                form.remove_field(&name);
            }
            if let Some(reply) = reply {
                reply.send(json!({}));
            }
        }));

        *self.subscriptions.lock().unwrap_or_else(|e| e.into_inner()) = subs;
    }

    fn frame_ready(&self, name: &str) {
        let ready = {
            let mut state = self.lock();
            if state.metadata.is_none() {
                debug!("queueing {name} until the handshake completes");
                state.pending.push(name.to_string());
                false
            } else {
                true
            }
        };
        if ready {
            if let Err(e) = self.initialize_frame(name) {
                warn!("could not initialize {name}: {e}");
            }
        }
    }

    /// Hand the frame its field, creating the field on first sight.
    pub fn initialize_frame(&self, name: &str) -> Result<(), SdkError> {
        let window = self
            .env
            .directory
            .find(name, &self.location)
            .ok_or_else(|| SdkError::FrameNotFound(name.to_string()))?;
        let existing = self.field(name);
        let field = match existing {
            Some(field) => field,
            None => {
                let field = FormField::new(name, &self.env, &self.container_id)?;
                self.lock().fields.push(field.clone());
                field
            }
        };
        window.boot(field)
    }

    /// Store the handshake metadata and initialize every queued frame.
    pub fn set_metadata(&self, metadata: HandshakeBundle) {
        let pending = {
            let mut state = self.lock();
            state.metadata = Some(metadata);
            std::mem::take(&mut state.pending)
        };
        for name in pending {
            if let Err(e) = self.initialize_frame(&name) {
                warn!("could not initialize {name}: {e}");
            }
        }
    }

    pub fn field(&self, name: &str) -> Option<Arc<FormField>> {
        self.lock()
            .fields
            .iter()
            .find(|f| f.frame_name() == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().fields.is_empty()
    }

    pub fn remove_field(&self, name: &str) {
        let removed = {
            let mut state = self.lock();
            let at = state.fields.iter().position(|f| f.frame_name() == name);
            at.map(|i| state.fields.remove(i))
        };
        if let Some(field) = removed {
            field.destroy();
            debug!("removed field {name}");
        }
    }

    /// `name -> value` over every field. Checked checkboxes of one name
    /// become an array, in the order their frames registered.
    pub fn collect_payload(&self) -> Result<Map<String, Value>, SdkError> {
        let fields: Vec<Arc<FormField>> = self.lock().fields.clone();
        let mut payload = Map::new();
        for field in fields {
            let state = field.state();
            if !state.is_valid || !state.is_complete {
                return Err(SdkError::IncompleteInputs(format!(
                    "{} is not complete and valid",
                    field.field_name()
                )));
            }
            if field.field_type() == ElementType::Checkbox {
                if state.value.is_empty() {
                    continue;
                }
                let entry = payload
                    .entry(field.field_name().to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(values) = entry {
                    values.push(Value::String(state.value));
                }
            } else {
                payload.insert(
                    field.field_name().to_string(),
                    Value::String(field.get_unformatted_value()),
                );
            }
        }
        Ok(payload)
    }

    /// Insert the collected values into the vault.
    pub async fn tokenize(&self, options: &CollectOptions) -> Result<InsertResponse, SdkError> {
        let payload = self.collect_payload()?;
        let client = wait_client(&self.client, self.env.options.request_timeout).await?;
        let mut batch = records::records_from_payload(&payload)?;
        if let Some(extra) = &options.additional_fields {
            batch = records::merge_additional(batch, extra)?;
        }
        records::validate_insert(&batch)?;
        info!("collecting {} fields into {} records", payload.len(), batch.len());
        records::insert(
            &client,
            &batch,
            &InsertOptions {
                tokens: options.tokens,
            },
        )
        .await
    }
}
