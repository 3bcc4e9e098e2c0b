//! Connection invocation.
//!
//! On the host, a `ConnectionConfig` holds tagged values: literals, collect
//! elements and reveal elements. `resolve` turns it into a
//! `ResolvedConnection` in which every element is replaced by a reference to
//! its frame (frame name plus owning container), which is all that ever
//! crosses to the secure origin. There, `invoke` swaps references for the
//! values the frames hold, calls the gateway and renders the marked response
//! values back into frames.

pub mod json;
pub mod soap;

use crate::client::{Client, RequestMethod, VaultRequest};
use crate::error::SdkError;
use crate::host::registry::{ElementIndex, IndexedElement};
use crate::host::{Element, RevealElement};
use json::{classify, flatten, render_response, resolve_refs, Reference, ReferenceResolver};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A value inside a connection template.
#[derive(Clone)]
pub enum ConnectionValue {
    Literal(Value),
    Collect(Element),
    Reveal(RevealElement),
    Object(BTreeMap<String, ConnectionValue>),
    Array(Vec<ConnectionValue>),
}

impl std::fmt::Debug for ConnectionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionValue::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            ConnectionValue::Collect(e) => f.debug_tuple("Collect").field(&e.frame_name()).finish(),
            ConnectionValue::Reveal(e) => f.debug_tuple("Reveal").field(&e.frame_name()).finish(),
            ConnectionValue::Object(m) => f.debug_map().entries(m.iter()).finish(),
            ConnectionValue::Array(a) => f.debug_list().entries(a.iter()).finish(),
        }
    }
}

impl ConnectionValue {
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ConnectionValue)>,
    {
        ConnectionValue::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<Value> for ConnectionValue {
    fn from(v: Value) -> Self {
        ConnectionValue::Literal(v)
    }
}

impl From<&str> for ConnectionValue {
    fn from(v: &str) -> Self {
        ConnectionValue::Literal(Value::String(v.to_string()))
    }
}

impl From<String> for ConnectionValue {
    fn from(v: String) -> Self {
        ConnectionValue::Literal(Value::String(v))
    }
}

impl From<Element> for ConnectionValue {
    fn from(e: Element) -> Self {
        ConnectionValue::Collect(e)
    }
}

impl From<&Element> for ConnectionValue {
    fn from(e: &Element) -> Self {
        ConnectionValue::Collect(e.clone())
    }
}

impl From<RevealElement> for ConnectionValue {
    fn from(e: RevealElement) -> Self {
        ConnectionValue::Reveal(e)
    }
}

impl From<&RevealElement> for ConnectionValue {
    fn from(e: &RevealElement) -> Self {
        ConnectionValue::Reveal(e.clone())
    }
}

/// Which part of a connection a value sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    Request,
    Response,
}

fn check_literal(value: &Value) -> Result<(), SdkError> {
    for (path, leaf) in flatten(value) {
        if let Some(s) = leaf.as_str() {
            if classify(s).is_some() {
                return Err(SdkError::InvalidInput(format!(
                    "literal at {path} uses a reserved frame prefix"
                )));
            }
        }
    }
    Ok(())
}

fn collect_reference(element: &Element) -> Result<String, SdkError> {
    if !element.is_mounted() {
        return Err(SdkError::ElementsNotMounted(element.name()));
    }
    Ok(Reference::new(element.frame_name(), element.container_id()).encode())
}

fn reveal_reference(element: &RevealElement, part: Part) -> Result<String, SdkError> {
    if !element.is_mounted() {
        return Err(SdkError::ElementsNotMounted(element.frame_name().to_string()));
    }
    match part {
        Part::Request => {
            if element.token().is_none() {
                return Err(SdkError::ElementMustHaveToken(element.frame_name().to_string()));
            }
            Ok(Reference::new(element.frame_name(), element.container_id()).encode())
        }
        Part::Response => Ok(element.reference().encode()),
    }
}

impl ConnectionValue {
    fn to_wire(&self, part: Part) -> Result<Value, SdkError> {
        match self {
            ConnectionValue::Literal(v) => {
                check_literal(v)?;
                Ok(v.clone())
            }
            ConnectionValue::Collect(element) => collect_reference(element).map(Value::String),
            ConnectionValue::Reveal(element) => reveal_reference(element, part).map(Value::String),
            ConnectionValue::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_wire(part)?);
                }
                Ok(Value::Object(out))
            }
            ConnectionValue::Array(items) => items
                .iter()
                .map(|v| v.to_wire(part))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }
}

fn wire_map(
    map: &Option<BTreeMap<String, ConnectionValue>>,
    part: Part,
) -> Result<Option<Map<String, Value>>, SdkError> {
    let Some(map) = map else {
        return Ok(None);
    };
    let mut out = Map::new();
    for (k, v) in map {
        out.insert(k.clone(), v.to_wire(part)?);
    }
    Ok(Some(out))
}

fn check_https(url: &str) -> Result<(), SdkError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| SdkError::InvalidInput(format!("connection url: {e}")))?;
    if parsed.scheme() != "https" {
        return Err(SdkError::InvalidInput(format!(
            "connection url must use https: {url}"
        )));
    }
    Ok(())
}

/// A REST connection call as the host describes it.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connection_url: String,
    pub method_name: RequestMethod,
    pub path_params: Option<BTreeMap<String, ConnectionValue>>,
    pub query_params: Option<BTreeMap<String, ConnectionValue>>,
    pub request_header: Option<BTreeMap<String, ConnectionValue>>,
    pub request_body: Option<ConnectionValue>,
    /// Response paths to render into frames instead of returning.
    pub response_body: Option<ConnectionValue>,
}

impl ConnectionConfig {
    pub fn new(connection_url: impl Into<String>, method_name: RequestMethod) -> Self {
        Self {
            connection_url: connection_url.into(),
            method_name,
            path_params: None,
            query_params: None,
            request_header: None,
            request_body: None,
            response_body: None,
        }
    }

    /// Replace elements by frame references. Every element must be mounted, and
    /// reveal elements used in the request need a token.
    pub fn resolve(&self) -> Result<ResolvedConnection, SdkError> {
        check_https(&self.connection_url)?;
        Ok(ResolvedConnection {
            connection_url: self.connection_url.clone(),
            method_name: self.method_name,
            path_params: wire_map(&self.path_params, Part::Request)?,
            query_params: wire_map(&self.query_params, Part::Request)?,
            request_header: wire_map(&self.request_header, Part::Request)?,
            request_body: self
                .request_body
                .as_ref()
                .map(|v| v.to_wire(Part::Request))
                .transpose()?,
            response_body: self
                .response_body
                .as_ref()
                .map(|v| v.to_wire(Part::Response))
                .transpose()?,
        })
    }
}

/// Wire form of a connection call: elements appear as frame references only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConnection {
    pub connection_url: String,
    pub method_name: RequestMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_params: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_params: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_header: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<Value>,
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn resolve_map(
    map: Option<Map<String, Value>>,
    resolver: &dyn ReferenceResolver,
) -> Result<Map<String, Value>, SdkError> {
    let mut value = Value::Object(map.unwrap_or_default());
    resolve_refs(&mut value, resolver).await?;
    Ok(match value {
        Value::Object(map) => map,
        _ => Map::new(),
    })
}

/// Build the outgoing URL: `{name}` segments from path params, then query
/// params appended.
pub fn build_url(
    base: &str,
    path_params: &Map<String, Value>,
    query_params: &Map<String, Value>,
) -> Result<String, SdkError> {
    let mut filled = base.to_string();
    for (name, value) in path_params {
        filled = filled.replace(&format!("{{{name}}}"), &text(value));
    }
    let mut url = url::Url::parse(&filled)
        .map_err(|e| SdkError::InvalidInput(format!("connection url: {e}")))?;
    if !query_params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in query_params {
            match value {
                Value::Array(items) => {
                    for item in items {
                        pairs.append_pair(name, &text(item));
                    }
                }
                other => {
                    pairs.append_pair(name, &text(other));
                }
            }
        }
    }
    Ok(url.to_string())
}

/// Run a resolved connection from inside the secure origin.
pub async fn invoke(
    client: &Client,
    resolver: &dyn ReferenceResolver,
    config: ResolvedConnection,
) -> Result<Value, SdkError> {
    let path_params = resolve_map(config.path_params, resolver).await?;
    let query_params = resolve_map(config.query_params, resolver).await?;
    let headers = resolve_map(config.request_header, resolver).await?;
    let body = match config.request_body {
        Some(mut body) => {
            resolve_refs(&mut body, resolver).await?;
            Some(body)
        }
        None => None,
    };

    let url = build_url(&config.connection_url, &path_params, &query_params)?;
    let mut request = VaultRequest::new(config.method_name, url);
    for (name, value) in &headers {
        request = request.header(name.clone(), text(value));
    }
    if let Some(body) = body {
        request = request.body(body);
    }
    debug!("invoking connection {}", config.method_name.as_str());
    let mut response = client.request_connection(request).await?;
    if let Some(template) = &config.response_body {
        render_response(&mut response, template, resolver)?;
    }
    Ok(response)
}

// ---- SOAP ---------------------------------------------------------------------

/// A SOAP connection call as the host describes it. Elements are referenced
/// by id inside `<Skyflow>` markers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoapConnectionConfig {
    pub connection_url: String,
    pub request_header: BTreeMap<String, String>,
    pub request_xml: String,
    pub response_xml: Option<String>,
}

/// Wire form of a SOAP call: marker ids replaced by frame references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoapConnectionRequest {
    pub connection_url: String,
    #[serde(default)]
    pub request_header: BTreeMap<String, String>,
    #[serde(rename = "requestXML")]
    pub request_xml: String,
    #[serde(rename = "responseXML", default, skip_serializing_if = "Option::is_none")]
    pub response_xml: Option<String>,
}

fn request_marker(index: &ElementIndex, id: &str) -> Result<String, SdkError> {
    let frame = match index.get(id) {
        Some(IndexedElement::Collect(e)) => ConnectionValue::Collect(e).to_wire(Part::Request)?,
        Some(IndexedElement::Reveal(e)) => ConnectionValue::Reveal(e).to_wire(Part::Request)?,
        None => return Err(SdkError::InvalidElementIdInSoapXml(id.to_string())),
    };
    Ok(soap::marker(&text(&frame)))
}

fn response_marker(index: &ElementIndex, id: &str) -> Result<String, SdkError> {
    let reference = match index.get(id) {
        Some(IndexedElement::Collect(e)) => collect_reference(&e)?,
        Some(IndexedElement::Reveal(e)) => reveal_reference(&e, Part::Response)?,
        None => return Err(SdkError::InvalidElementIdInSoapXml(id.to_string())),
    };
    Ok(soap::marker(&reference))
}

impl SoapConnectionConfig {
    pub fn new(connection_url: impl Into<String>, request_xml: impl Into<String>) -> Self {
        Self {
            connection_url: connection_url.into(),
            request_xml: request_xml.into(),
            ..Default::default()
        }
    }

    /// Swap element ids for frame references.
    pub fn resolve(&self, index: &ElementIndex) -> Result<SoapConnectionRequest, SdkError> {
        check_https(&self.connection_url)?;
        if self.request_xml.trim().is_empty() {
            return Err(SdkError::InvalidInput("request xml is required".into()));
        }
        let request_xml = soap::replace_markers(&self.request_xml, |id| request_marker(index, id))?;
        let response_xml = match &self.response_xml {
            Some(xml) => {
                let mut seen = BTreeSet::new();
                for id in soap::marker_ids(xml) {
                    if !seen.insert(id.clone()) {
                        return Err(SdkError::DuplicateElementInSoapXml(id));
                    }
                }
                Some(soap::replace_markers(xml, |id| response_marker(index, id))?)
            }
            None => None,
        };
        Ok(SoapConnectionRequest {
            connection_url: self.connection_url.clone(),
            request_header: self.request_header.clone(),
            request_xml,
            response_xml,
        })
    }
}

/// Run a resolved SOAP call from inside the secure origin and return the
/// response XML with rendered values removed.
pub async fn invoke_soap(
    client: &Client,
    resolver: &dyn ReferenceResolver,
    config: SoapConnectionRequest,
) -> Result<String, SdkError> {
    let xml = soap::build_request_xml(&config.request_xml, resolver).await?;
    let mut request = VaultRequest::new(RequestMethod::Post, config.connection_url.clone())
        .header("Content-Type", "text/xml;charset=UTF-8")
        .body(Value::String(xml));
    for (name, value) in &config.request_header {
        request = request.header(name.clone(), value.clone());
    }
    let response = text(&client.request_connection(request).await?);
    match &config.response_xml {
        Some(template) => soap::map_response(&response, template, resolver),
        None => Ok(response),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{fresh_token, ScriptedTransport};
    use crate::client::{ClientJson, TokenFn};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct Frames {
        rendered: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ReferenceResolver for Frames {
        async fn collect_value(&self, frame: &Reference) -> Result<String, SdkError> {
            match frame.frame.as_str() {
                "element:card_number:card.number" => Ok("4111111111111111".into()),
                "element:cvv:card.cvv" => Ok("123".into()),
                other => Err(SdkError::FrameNotFound(other.into())),
            }
        }
        async fn reveal_value(&self, _frame: &Reference) -> Result<String, SdkError> {
            Ok("revealed-ssn".into())
        }
        fn render(&self, frame: &Reference, value: &str) -> Result<(), SdkError> {
            self.rendered
                .lock()
                .unwrap()
                .push((frame.frame.clone(), value.to_string()));
            Ok(())
        }
    }

    fn client(transport: Arc<ScriptedTransport>) -> Client {
        Client::new(
            ClientJson {
                vault_id: "v1".into(),
                vault_url: "https://vault.example".into(),
                client_domain: "https://host.example".into(),
                uuid: "u".into(),
            },
            Arc::new(TokenFn::new(|| async { Ok(fresh_token()) })),
            transport,
        )
    }

    #[test]
    fn test_build_url() {
        let path = json!({"card_id": "abc"}).as_object().cloned().unwrap();
        let query = json!({"limit": 5, "tag": ["a", "b"]}).as_object().cloned().unwrap();
        let url = build_url("https://gw.example/cards/{card_id}/charge", &path, &query).unwrap();
        assert_eq!(url, "https://gw.example/cards/abc/charge?limit=5&tag=a&tag=b");
    }

    #[test]
    fn test_literal_with_reserved_prefix_rejected() {
        let mut config = ConnectionConfig::new("https://gw.example/x", RequestMethod::Post);
        config.request_body = Some(ConnectionValue::object([(
            "note",
            ConnectionValue::from("element:cvv:spoof"),
        )]));
        assert!(matches!(config.resolve(), Err(SdkError::InvalidInput(_))));

        let insecure = ConnectionConfig::new("http://gw.example/x", RequestMethod::Get);
        assert!(insecure.resolve().is_err());
    }

    #[tokio::test]
    async fn test_invoke_substitutes_and_renders() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.replies.lock().unwrap().push(Ok(json!({
            "result": {"pan": "4111111111111111", "status": "approved"}
        })));
        let frames = Frames {
            rendered: Mutex::new(vec![]),
        };
        let config = ResolvedConnection {
            connection_url: "https://gw.example/cards/{id}".into(),
            method_name: RequestMethod::Post,
            path_params: Some(json!({"id": "42"}).as_object().cloned().unwrap()),
            query_params: None,
            request_header: Some(json!({"X-Trace": "t1"}).as_object().cloned().unwrap()),
            request_body: Some(json!({
                "card": {"number": "element:card_number:card.number", "cvv": "element:cvv:card.cvv"},
                "amount": 10
            })),
            response_body: Some(json!({"result": {"pan": "element:card_number:card.number"}})),
        };

        let response = invoke(&client(transport.clone()), &frames, config).await.unwrap();
        assert_eq!(response, json!({"result": {"status": "approved"}}));
        assert_eq!(frames.rendered.lock().unwrap().len(), 1);

        let seen = transport.seen.lock().unwrap();
        let sent = &seen[0];
        assert_eq!(sent.url, "https://gw.example/cards/42");
        assert_eq!(sent.headers["X-Trace"], "t1");
        assert!(sent.headers.contains_key("X-Skyflow-Authorization"));
        let body = sent.body.as_ref().unwrap();
        assert_eq!(body["card"]["number"], "4111111111111111");
        assert_eq!(body["card"]["cvv"], "123");
        assert_eq!(body["amount"], 10);
    }

    #[tokio::test]
    async fn test_invoke_soap_round_trip() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.replies.lock().unwrap().push(Ok(Value::String(
            "<Envelope><Body><Ssn>123-45-6789</Ssn><Ok>true</Ok></Body></Envelope>".into(),
        )));
        let frames = Frames {
            rendered: Mutex::new(vec![]),
        };
        let config = SoapConnectionRequest {
            connection_url: "https://soap.example/svc".into(),
            request_header: BTreeMap::from([("SOAPAction".to_string(), "Check".to_string())]),
            request_xml: "<Envelope><Body><Cvv><Skyflow>element:cvv:card.cvv</Skyflow></Cvv></Body></Envelope>".into(),
            response_xml: Some(
                "<Envelope><Body><Ssn><Skyflow>reveal::r1</Skyflow></Ssn></Body></Envelope>".into(),
            ),
        };

        let out = invoke_soap(&client(transport.clone()), &frames, config).await.unwrap();
        assert_eq!(out, "<Envelope><Body><Ok>true</Ok></Body></Envelope>");
        assert_eq!(
            frames.rendered.lock().unwrap()[0],
            ("reveal::r1".to_string(), "123-45-6789".to_string())
        );
        let seen = transport.seen.lock().unwrap();
        assert_eq!(
            seen[0].body,
            Some(Value::String(
                "<Envelope><Body><Cvv>123</Cvv></Body></Envelope>".into()
            ))
        );
        assert_eq!(seen[0].headers["SOAPAction"], "Check");
    }
}
