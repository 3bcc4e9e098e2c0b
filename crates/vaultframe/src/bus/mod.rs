//! Cross-frame message bus.
//!
//! One `Bus` stands in for the browser's message channel between the host
//! page and every secure frame. Each frame talks through a `BusEndpoint`
//! bound to its own origin; `target(origin)` narrows an endpoint so that its
//! listeners only accept messages sent from that origin and its emits only
//! reach listeners living on that origin.
//!
//! Handlers run in subscription order. A request carries a `Reply`; the first
//! reply wins and later ones are dropped, so a request can never resolve
//! twice.

pub mod events;

use crate::error::SdkError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// `{eventName, payload}` plus routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub event_name: String,
    /// Origin of the sending frame.
    pub origin: String,
    /// Origin the message is restricted to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub payload: Value,
}

impl Message {
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, SdkError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            SdkError::InvalidInput(format!("malformed {} payload: {e}", self.event_name))
        })
    }
}

type Handler = Arc<dyn Fn(&Message, Option<Reply>) + Send + Sync>;

struct Listener {
    id: u64,
    event: String,
    /// Origin of the frame that registered the listener.
    origin: String,
    /// Only messages from this origin are delivered, when set.
    accept_from: Option<String>,
    handler: Handler,
}

#[derive(Default)]
struct BusState {
    listeners: Vec<Listener>,
    next_id: u64,
}

/// The shared hub. Cheap to clone.
#[derive(Clone, Default)]
pub struct Bus {
    state: Arc<Mutex<BusState>>,
}

fn lock(state: &Mutex<BusState>) -> MutexGuard<'_, BusState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoint for a frame living on `origin`.
    pub fn endpoint(&self, origin: impl Into<String>) -> BusEndpoint {
        BusEndpoint {
            bus: self.clone(),
            origin: origin.into(),
            target: None,
        }
    }

    /// Number of live listeners for an event name.
    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.state)
            .listeners
            .iter()
            .filter(|l| l.event == event)
            .count()
    }

    fn subscribe(
        &self,
        event: &str,
        origin: &str,
        accept_from: Option<String>,
        handler: Handler,
    ) -> Subscription {
        let mut state = lock(&self.state);
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.push(Listener {
            id,
            event: event.to_string(),
            origin: origin.to_string(),
            accept_from,
            handler,
        });
        Subscription {
            state: Arc::downgrade(&self.state),
            id,
        }
    }

    fn dispatch(&self, message: &Message, reply: Option<Reply>) -> usize {
        // Handlers may subscribe or emit, so they run outside the lock.
        let handlers: Vec<Handler> = lock(&self.state)
            .listeners
            .iter()
            .filter(|l| {
                l.event == message.event_name
                    && l.accept_from.as_deref().map_or(true, |o| o == message.origin)
                    && message.target.as_deref().map_or(true, |t| t == l.origin)
            })
            .map(|l| l.handler.clone())
            .collect();
        for handler in &handlers {
            handler(message, reply.clone());
        }
        handlers.len()
    }
}

/// A frame's view of the bus.
#[derive(Clone)]
pub struct BusEndpoint {
    bus: Bus,
    origin: String,
    target: Option<String>,
}

impl BusEndpoint {
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Same frame, restricted to one peer origin.
    pub fn target(&self, origin: impl Into<String>) -> BusEndpoint {
        BusEndpoint {
            bus: self.bus.clone(),
            origin: self.origin.clone(),
            target: Some(origin.into()),
        }
    }

    /// Register a handler. The listener lives as long as the returned
    /// subscription.
    #[must_use = "dropping the subscription removes the listener"]
    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Message, Option<Reply>) + Send + Sync + 'static,
    {
        self.bus
            .subscribe(event, &self.origin, self.target.clone(), Arc::new(handler))
    }

    fn message(&self, event: &str, payload: Value) -> Message {
        Message {
            event_name: event.to_string(),
            origin: self.origin.clone(),
            target: self.target.clone(),
            payload,
        }
    }

    /// Fire and forget. Returns how many listeners received the message.
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        let message = self.message(event, payload);
        debug!("bus emit {} from {}", event, self.origin);
        self.bus.dispatch(&message, None)
    }

    /// `emit` with a typed payload.
    pub fn emit_as<T: Serialize>(&self, event: &str, payload: &T) -> usize {
        match serde_json::to_value(payload) {
            Ok(value) => self.emit(event, value),
            Err(e) => {
                warn!("dropping unserializable {event} payload: {e}");
                0
            }
        }
    }

    /// `request` with a typed payload and reply.
    pub async fn call<T, R>(
        &self,
        event: &str,
        payload: &T,
        timeout: Option<Duration>,
    ) -> Result<R, SdkError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let value = self.request(event, serde_json::to_value(payload)?, timeout).await?;
        serde_json::from_value(value).map_err(|e| SdkError::Remote {
            code: 500,
            description: format!("malformed {event} reply: {e}"),
        })
    }

    /// Emit with a reply channel and wait for the first reply.
    ///
    /// Fails with `ChannelClosed` when every handler dropped its `Reply`
    /// without answering (including the case of no handler at all), and with
    /// `Timeout` when `timeout` elapses first. A `{error}` reply is decoded
    /// into the error it carries.
    pub async fn request(
        &self,
        event: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, SdkError> {
        let (tx, rx) = oneshot::channel();
        let reply = Reply {
            event: Arc::from(event),
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        let message = self.message(event, payload);
        debug!("bus request {} from {}", event, self.origin);
        self.bus.dispatch(&message, Some(reply));

        let value = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| SdkError::Timeout(event.to_string()))?,
            None => rx.await,
        }
        .map_err(|_| SdkError::ChannelClosed(event.to_string()))?;
        decode_reply(value)
    }
}

/// Listener registration. Dropping it removes the listener.
#[derive(Debug)]
pub struct Subscription {
    state: Weak<Mutex<BusState>>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            lock(&state).listeners.retain(|l| l.id != self.id);
        }
    }
}

/// One-shot reply handle shared by every handler of a request.
#[derive(Clone)]
pub struct Reply {
    event: Arc<str>,
    slot: Arc<Mutex<Option<oneshot::Sender<Value>>>>,
}

impl Reply {
    /// Deliver `value` if nobody replied yet. Returns whether it was taken.
    pub fn send(&self, value: Value) -> bool {
        let sender = self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => {
                debug!("duplicate reply to {} ignored", self.event);
                false
            }
        }
    }

    pub fn error(&self, err: &SdkError) -> bool {
        self.send(json!({ "error": err }))
    }

    pub fn send_result<T: Serialize>(&self, result: Result<T, SdkError>) -> bool {
        match result.and_then(|v| serde_json::to_value(v).map_err(SdkError::from)) {
            Ok(value) => self.send(value),
            Err(err) => self.error(&err),
        }
    }
}

/// Turn a `{error}` envelope back into an error.
pub fn decode_reply(value: Value) -> Result<Value, SdkError> {
    let Some(error) = value.as_object().and_then(|o| o.get("error")) else {
        return Ok(value);
    };
    if let Ok(err) = serde_json::from_value::<SdkError>(error.clone()) {
        return Err(err);
    }
    if let Ok(body) = serde_json::from_value::<crate::error::ErrorBody>(error.clone()) {
        return Err(body.into());
    }
    let description = match error {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Err(SdkError::Remote {
        code: 500,
        description,
    })
}
