//! Event names and payload shapes of the bus wire contract.

use crate::client::ClientJson;
use crate::config::Context;
use crate::connection::{ResolvedConnection, SoapConnectionRequest};
use crate::elements::{ElementOptions, ElementType};
use crate::error::SdkError;
use crate::records::{
    CollectOptions, DetokenizeRecord, GetByIdRecord, InsertOptions, InsertRecord, RevealRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---- event names ------------------------------------------------------------

pub const FRAME_READY: &str = "FRAME_READY";
pub const INPUT_EVENT: &str = "INPUT_EVENT";
pub const SET_VALUE: &str = "SET_VALUE";
pub const RADIO_SYNC: &str = "RADIO_SYNC";
pub const TOKENIZATION_REQUEST: &str = "TOKENIZATION_REQUEST";
pub const DESTROY_FRAME: &str = "DESTROY_FRAME";
pub const REVEAL_REQUEST: &str = "REVEAL_REQUEST";
pub const PUREJS_FRAME_READY: &str = "PUREJS_FRAME_READY";
pub const PUREJS_REQUEST: &str = "PUREJS_REQUEST";
pub const GET_BEARER_TOKEN: &str = "GET_BEARER_TOKEN";

// ---- frame names ------------------------------------------------------------

pub const COLLECT_CONTROLLER: &str = "collect_controller";
pub const REVEAL_CONTROLLER: &str = "reveal_controller";
pub const VAULT_CONTROLLER: &str = "vault_controller";
pub const FRAME_ELEMENT: &str = "element";
pub const FRAME_REVEAL: &str = "reveal";

/// Separators appended to a frame name in a connection template: the owning
/// container, then for reveal frames in a response an optional format.
pub const FRAME_CONTAINER: &str = "::CONTAINER::";
pub const FORMAT_REGEX: &str = "::FORMAT_REGEX::";
pub const REPLACE_TEXT: &str = "::REPLACE_TEXT::";

/// Event or frame name scoped to one container.
pub fn scoped(name: &str, id: &str) -> String {
    format!("{name}:{id}")
}

/// `element:<type>:<name>[:<value>]`. Radio and checkbox frames carry their
/// option value so that every option gets its own frame.
pub fn element_frame_name(element_type: ElementType, name: &str, value: Option<&str>) -> String {
    match value {
        Some(value) => format!("{FRAME_ELEMENT}:{element_type}:{name}:{value}"),
        None => format!("{FRAME_ELEMENT}:{element_type}:{name}"),
    }
}

/// Split an element frame name back into type, field name and option value.
pub fn parse_element_frame_name(
    frame_name: &str,
) -> Result<(ElementType, String, Option<String>), SdkError> {
    let rest = frame_name
        .strip_prefix(FRAME_ELEMENT)
        .and_then(|r| r.strip_prefix(':'))
        .ok_or_else(|| SdkError::FrameNotFound(frame_name.to_string()))?;
    let mut parts = rest.splitn(3, ':');
    let element_type: ElementType = parts.next().unwrap_or_default().parse()?;
    let name = parts
        .next()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| SdkError::FrameNotFound(frame_name.to_string()))?;
    Ok((element_type, name.to_string(), parts.next().map(str::to_string)))
}

/// Whether a frame name belongs to one of the controller frames.
pub fn is_controller_name(name: &str) -> bool {
    [COLLECT_CONTROLLER, REVEAL_CONTROLLER, VAULT_CONTROLLER]
        .iter()
        .any(|c| name == *c || name.starts_with(&format!("{c}:")))
}

// ---- element events -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementEvent {
    Focus,
    Blur,
    Change,
    Ready,
}

impl std::str::FromStr for ElementEvent {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FOCUS" => Ok(ElementEvent::Focus),
            "BLUR" => Ok(ElementEvent::Blur),
            "CHANGE" => Ok(ElementEvent::Change),
            "READY" => Ok(ElementEvent::Ready),
            _ => Err(SdkError::InvalidEventListener(s.to_string())),
        }
    }
}

/// Public state of one field. `value` is present only for non-sensitive
/// fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementState {
    pub is_empty: bool,
    pub is_complete: bool,
    pub is_valid: bool,
    pub is_focused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_type: Option<ElementType>,
}

impl Default for ElementState {
    fn default() -> Self {
        Self {
            is_empty: true,
            is_complete: false,
            is_valid: false,
            is_focused: false,
            value: None,
            element_type: None,
        }
    }
}

// ---- payloads -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameReady {
    pub name: String,
}

/// Focus/blur commands from the host, state notifications from a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    pub name: String,
    pub event: ElementEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ElementState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SetValue {
    Value { name: String, value: String },
    Options { name: String, options: Map<String, Value> },
}

/// Radio selection broadcast between frames of the secure origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadioSync {
    pub field_name: String,
    pub field_type: ElementType,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyFrame {
    pub name: String,
}

/// What the host hands a controller frame once it announces itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeBundle {
    pub client: ClientJson,
    pub context: Context,
}

/// What the host hands an element frame once it announces itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementBoot {
    pub element_type: ElementType,
    pub options: ElementOptions,
}

/// What the host hands a reveal frame once it announces itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealBoot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Shown until a value is revealed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenizationRequest {
    #[serde(default)]
    pub options: CollectOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealRequest {
    pub records: Vec<RevealRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BearerTokenReply {
    Value { value: String },
    Error { error: SdkError },
}

/// Requests served by the vault controller frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayRequest {
    Insert {
        records: Vec<InsertRecord>,
        options: InsertOptions,
    },
    Detokenize {
        records: Vec<DetokenizeRecord>,
    },
    GetById {
        records: Vec<GetByIdRecord>,
    },
    InvokeConnection {
        config: ResolvedConnection,
    },
    InvokeSoapConnection {
        config: SoapConnectionRequest,
    },
}

impl GatewayRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayRequest::Insert { .. } => "INSERT",
            GatewayRequest::Detokenize { .. } => "DETOKENIZE",
            GatewayRequest::GetById { .. } => "GET_BY_ID",
            GatewayRequest::InvokeConnection { .. } => "INVOKE_CONNECTION",
            GatewayRequest::InvokeSoapConnection { .. } => "INVOKE_SOAP_CONNECTION",
        }
    }
}
