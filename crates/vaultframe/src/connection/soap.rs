//! SOAP request and response mapping.
//!
//! The host writes `<Skyflow>element-id</Skyflow>` markers into its request
//! and response templates. Before anything leaves the host, ids become frame
//! names; inside the secure origin, request markers become values and
//! response markers say which values to render into frames and strip.

use super::json::{classify, Reference, ReferenceResolver};
use crate::error::SdkError;
use futures::future::try_join_all;
use quick_xml::escape::{escape, unescape};
use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<skyflow>\s*(.*?)\s*</skyflow>").unwrap());

const MARKER_TAG: &str = "skyflow";

/// Rewrite every marker's content with `map`, which may reject an id.
pub fn replace_markers<F>(xml: &str, mut map: F) -> Result<String, SdkError>
where
    F: FnMut(&str) -> Result<String, SdkError>,
{
    let mut failure = None;
    let out = MARKER_RE.replace_all(xml, |caps: &Captures| {
        if failure.is_some() {
            return String::new();
        }
        let raw = caps.get(1).map_or("", |m| m.as_str());
        let inner = unescape(raw).map(|c| c.into_owned()).unwrap_or_else(|_| raw.to_string());
        match map(&inner) {
            Ok(replacement) => replacement,
            Err(e) => {
                failure = Some(e);
                String::new()
            }
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(out.into_owned()),
    }
}

/// Marker contents in document order.
pub fn marker_ids(xml: &str) -> Vec<String> {
    MARKER_RE
        .captures_iter(xml)
        .filter_map(|c| c.get(1))
        .map(|m| {
            unescape(m.as_str())
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| m.as_str().to_string())
        })
        .collect()
}

/// Wrap a frame reference back into a marker.
pub fn marker(content: &str) -> String {
    format!("<Skyflow>{}</Skyflow>", escape(content))
}

/// Resolve request markers into escaped values.
pub async fn build_request_xml(
    xml: &str,
    resolver: &dyn ReferenceResolver,
) -> Result<String, SdkError> {
    let frames: BTreeSet<String> = marker_ids(xml).into_iter().collect();
    let resolved = try_join_all(frames.iter().map(|frame| async move {
        let kind = classify(frame)
            .ok_or_else(|| SdkError::InvalidElementIdInSoapXml(frame.clone()))?;
        let value = resolver.resolve(kind, &Reference::parse(frame)).await?;
        Ok::<_, SdkError>((frame.clone(), value))
    }))
    .await?;
    let values: BTreeMap<String, String> = resolved.into_iter().collect();
    replace_markers(xml, |frame| {
        values
            .get(frame)
            .map(|v| escape(v.as_str()).into_owned())
            .ok_or_else(|| SdkError::InvalidElementIdInSoapXml(frame.to_string()))
    })
}

// ---- document tree -----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    /// Raw (still escaped) attribute values.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    fn new(name: String) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    fn elements(&self) -> impl Iterator<Item = (usize, &XmlElement)> {
        self.children.iter().enumerate().filter_map(|(i, c)| match c {
            XmlNode::Element(e) => Some((i, e)),
            XmlNode::Text(_) => None,
        })
    }

    /// Concatenated text content of direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                XmlNode::Text(t) => Some(t.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect::<String>()
            .trim()
            .to_string()
    }

    fn marker(&self) -> Option<&XmlElement> {
        self.elements()
            .map(|(_, e)| e)
            .find(|e| e.name.eq_ignore_ascii_case(MARKER_TAG))
    }

    fn is_leaf(&self) -> bool {
        self.elements().next().is_none()
    }

    /// `(relative path, text)` of leaf descendants that are not markers.
    fn identifiers(&self) -> Vec<(Vec<String>, String)> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut Vec::new(), &mut out);
        out
    }

    fn collect_identifiers(&self, path: &mut Vec<String>, out: &mut Vec<(Vec<String>, String)>) {
        for (_, child) in self.elements() {
            if child.marker().is_some() {
                continue;
            }
            path.push(child.name.clone());
            if child.is_leaf() {
                out.push((path.clone(), child.text()));
            } else {
                child.collect_identifiers(path, out);
            }
            path.pop();
        }
    }

    fn find_path(&self, path: &[String]) -> Option<&XmlElement> {
        path.iter().try_fold(self, |node, name| {
            node.elements().map(|(_, e)| e).find(|e| &e.name == name)
        })
    }

    fn remove_at(&mut self, path: &[usize]) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };
        let mut node = self;
        for &i in parents {
            match node.children.get_mut(i) {
                Some(XmlNode::Element(e)) => node = e,
                _ => return,
            }
        }
        if *last < node.children.len() {
            node.children.remove(*last);
        }
    }
}

/// A parsed document: optional declaration plus the root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub declaration: Option<String>,
    pub root: XmlElement,
}

fn xml_err(e: impl std::fmt::Display) -> SdkError {
    SdkError::Xml(e.to_string())
}

pub fn parse(xml: &str) -> Result<XmlDocument, SdkError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut declaration = None;
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root = None;

    fn open(e: &quick_xml::events::BytesStart<'_>) -> XmlElement {
        let mut element = XmlElement::new(String::from_utf8_lossy(e.name().as_ref()).to_string());
        for attr in e.attributes().flatten() {
            element.attributes.push((
                String::from_utf8_lossy(attr.key.as_ref()).to_string(),
                String::from_utf8_lossy(&attr.value).to_string(),
            ));
        }
        element
    }

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Decl(ref d)) => {
                declaration = Some(String::from_utf8_lossy(d).to_string());
            }
            Ok(Event::Start(ref e)) => stack.push(open(e)),
            Ok(Event::Empty(ref e)) => {
                let element = open(e);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(XmlNode::Element(element)),
                    None if root.is_none() => root = Some(element),
                    None => return Err(SdkError::Xml("multiple root elements".into())),
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(xml_err)?.to_string();
                if let Some(parent) = stack.last_mut() {
                    if !text.is_empty() {
                        parent.children.push(XmlNode::Text(text));
                    }
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(parent) = stack.last_mut() {
                    parent
                        .children
                        .push(XmlNode::Text(String::from_utf8_lossy(e).to_string()));
                }
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| SdkError::Xml("unexpected closing tag".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(XmlNode::Element(element)),
                    None if root.is_none() => root = Some(element),
                    None => return Err(SdkError::Xml("multiple root elements".into())),
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(e)),
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(SdkError::Xml("unclosed element".into()));
    }
    let root = root.ok_or_else(|| SdkError::Xml("document has no root element".into()))?;
    Ok(XmlDocument { declaration, root })
}

pub fn serialize(doc: &XmlDocument) -> String {
    fn write(element: &XmlElement, out: &mut String) {
        out.push('<');
        out.push_str(&element.name);
        for (k, v) in &element.attributes {
            out.push_str(&format!(" {k}=\"{v}\""));
        }
        if element.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &element.children {
            match child {
                XmlNode::Element(e) => write(e, out),
                XmlNode::Text(t) => out.push_str(&escape(t.as_str())),
            }
        }
        out.push_str(&format!("</{}>", element.name));
    }

    let mut out = String::new();
    if let Some(decl) = &doc.declaration {
        out.push_str(&format!("<?{decl}?>"));
    }
    write(&doc.root, &mut out);
    out
}

// ---- response mapping --------------------------------------------------------

struct SecureValue {
    path: Vec<usize>,
    reference: Reference,
    value: String,
}

fn map_children(
    template: &XmlElement,
    response: &XmlElement,
    index_path: &mut Vec<usize>,
    name_path: &mut Vec<String>,
    found: &mut Vec<SecureValue>,
) -> Result<(), SdkError> {
    let mut ordinal: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, t) in template.elements() {
        if t.name.eq_ignore_ascii_case(MARKER_TAG) {
            continue;
        }
        let nth = {
            let n = ordinal.entry(t.name.as_str()).or_insert(0);
            *n += 1;
            *n - 1
        };
        name_path.push(t.name.clone());
        let candidates: Vec<(usize, &XmlElement)> =
            response.elements().filter(|(_, e)| e.name == t.name).collect();

        let chosen = if candidates.len() <= 1 {
            candidates.first().copied()
        } else {
            let ids = t.identifiers();
            if ids.is_empty() {
                candidates.get(nth).copied()
            } else {
                candidates.iter().copied().find(|(_, c)| {
                    ids.iter()
                        .all(|(path, text)| c.find_path(path).is_some_and(|n| &n.text() == text))
                })
            }
        };
        let Some((index, actual)) = chosen else {
            return Err(SdkError::ResponsePathNotFound(name_path.join(".")));
        };

        index_path.push(index);
        if let Some(marker) = t.marker() {
            found.push(SecureValue {
                path: index_path.clone(),
                reference: Reference::parse(&marker.text()),
                value: actual.text(),
            });
        } else {
            map_children(t, actual, index_path, name_path, found)?;
        }
        index_path.pop();
        name_path.pop();
    }
    Ok(())
}

/// Render marked response values into their frames and return the response
/// without them.
pub fn map_response(
    response_xml: &str,
    template_xml: &str,
    resolver: &dyn ReferenceResolver,
) -> Result<String, SdkError> {
    let template = parse(template_xml)?;
    let mut response = parse(response_xml)?;
    if template.root.name != response.root.name {
        return Err(SdkError::ResponsePathNotFound(template.root.name.clone()));
    }

    let mut found = Vec::new();
    map_children(
        &template.root,
        &response.root,
        &mut Vec::new(),
        &mut vec![template.root.name.clone()],
        &mut found,
    )?;

    for item in &found {
        resolver.render(&item.reference, &item.reference.format(&item.value)?)?;
    }
    found.sort_by(|a, b| b.path.cmp(&a.path));
    for item in &found {
        response.root.remove_at(&item.path);
    }
    Ok(serialize(&response))
}
