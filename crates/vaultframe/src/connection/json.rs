//! Dotted-path helpers and element reference resolution for JSON templates.

use crate::bus::events::{FORMAT_REGEX, FRAME_CONTAINER, FRAME_ELEMENT, FRAME_REVEAL, REPLACE_TEXT};
use crate::elements::options::compile_pattern;
use crate::error::SdkError;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{Map, Value};
use tracing::warn;

/// Leaves of a JSON value keyed by dotted path. Array items use their index
/// as a segment; empty objects and arrays count as leaves.
pub fn flatten(value: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn flatten_into(value: &Value, prefix: String, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                flatten_into(v, join(&prefix, k), out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, v) in items.iter().enumerate() {
                flatten_into(v, join(&prefix, &i.to_string()), out);
            }
        }
        leaf => out.push((prefix, leaf.clone())),
    }
}

pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Write `new` at `path`, creating objects along the way.
pub fn set_path(value: &mut Value, path: &str, new: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    set_segments(value, &segments, new);
}

fn set_segments(node: &mut Value, segments: &[&str], new: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = new;
        return;
    };
    if let Value::Array(items) = node {
        if let Ok(i) = head.parse::<usize>() {
            if items.len() <= i {
                items.resize(i + 1, Value::Null);
            }
            set_segments(&mut items[i], rest, new);
            return;
        }
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.to_string()).or_insert(Value::Null);
        set_segments(child, rest, new);
    }
}

/// Remove the value at `path`. Array slots are nulled so sibling paths stay
/// valid.
pub fn remove_path(value: &mut Value, path: &str) -> Option<Value> {
    let (parent, key) = match path.rsplit_once('.') {
        Some((parent, key)) => (get_path_mut(value, parent)?, key),
        None => (value, path),
    };
    match parent {
        Value::Object(map) => map.remove(key),
        Value::Array(items) => {
            let i = key.parse::<usize>().ok()?;
            items.get_mut(i).map(|slot| std::mem::replace(slot, Value::Null))
        }
        _ => None,
    }
}

fn get_path_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.').try_fold(value, |node, segment| match node {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        _ => None,
    })
}

// ---- element references -------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Collect,
    Reveal,
}

/// Classify a string leaf by frame-name prefix.
pub fn classify(s: &str) -> Option<RefKind> {
    let (prefix, _) = s.split_once(':')?;
    match prefix {
        FRAME_ELEMENT => Some(RefKind::Collect),
        FRAME_REVEAL => Some(RefKind::Reveal),
        _ => None,
    }
}

/// A frame reference as it crosses to the secure origin: the frame name, the
/// container the frame belongs to and, in response templates, an optional
/// display format. Frame names are only unique within a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub frame: String,
    pub container: Option<String>,
    pub format_regex: Option<String>,
    pub replace_text: Option<String>,
}

impl Reference {
    pub fn new(frame: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            frame: frame.into(),
            container: Some(container.into()),
            format_regex: None,
            replace_text: None,
        }
    }

    pub fn parse(s: &str) -> Self {
        let (head, replace_text) = match s.split_once(REPLACE_TEXT) {
            Some((head, text)) => (head, Some(text.to_string())),
            None => (s, None),
        };
        let (head, format_regex) = match head.split_once(FORMAT_REGEX) {
            Some((head, re)) => (head, Some(re.to_string())),
            None => (head, None),
        };
        let (frame, container) = match head.rsplit_once(FRAME_CONTAINER) {
            Some((frame, id)) => (frame.to_string(), Some(id.to_string())),
            None => (head.to_string(), None),
        };
        Self {
            frame,
            container,
            format_regex,
            replace_text,
        }
    }

    pub fn encode(&self) -> String {
        let mut out = self.frame.clone();
        if let Some(id) = &self.container {
            out.push_str(FRAME_CONTAINER);
            out.push_str(id);
        }
        if let Some(re) = &self.format_regex {
            out.push_str(FORMAT_REGEX);
            out.push_str(re);
            if let Some(text) = &self.replace_text {
                out.push_str(REPLACE_TEXT);
                out.push_str(text);
            }
        }
        out
    }

    /// With replace text every match is replaced; otherwise only the first
    /// match is kept. No match leaves the value untouched.
    pub fn format(&self, value: &str) -> Result<String, SdkError> {
        let value = value.trim();
        let Some(re) = &self.format_regex else {
            return Ok(value.to_string());
        };
        let re = compile_pattern(re)?;
        if let Some(text) = &self.replace_text {
            return Ok(re.replace_all(value, text.as_str()).into_owned());
        }
        match re.find(value) {
            Some(m) => Ok(m.as_str().to_string()),
            None => {
                warn!("no match for format regex on {}", self.frame);
                Ok(value.to_string())
            }
        }
    }
}

/// Access to frame values from inside the secure origin.
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    /// Current value of a collect element frame.
    async fn collect_value(&self, frame: &Reference) -> Result<String, SdkError>;
    /// Detokenized value of a reveal element frame.
    async fn reveal_value(&self, frame: &Reference) -> Result<String, SdkError>;
    /// Display a value inside a frame without handing it to the host.
    fn render(&self, frame: &Reference, value: &str) -> Result<(), SdkError>;

    async fn resolve(&self, kind: RefKind, frame: &Reference) -> Result<String, SdkError> {
        match kind {
            RefKind::Collect => self.collect_value(frame).await,
            RefKind::Reveal => self.reveal_value(frame).await,
        }
    }
}

/// Replace every frame reference inside `value` with the frame's value.
pub async fn resolve_refs(
    value: &mut Value,
    resolver: &dyn ReferenceResolver,
) -> Result<(), SdkError> {
    let refs: Vec<(String, Reference, RefKind)> = flatten(value)
        .into_iter()
        .filter_map(|(path, leaf)| {
            let s = leaf.as_str()?;
            classify(s).map(|kind| (path, Reference::parse(s), kind))
        })
        .collect();
    let resolved = try_join_all(refs.iter().map(|(path, frame, kind)| async move {
        let v = resolver.resolve(*kind, frame).await?;
        Ok::<_, SdkError>((path.as_str(), v))
    }))
    .await?;
    for (path, v) in resolved {
        if path.is_empty() {
            *value = Value::String(v);
        } else {
            set_path(value, path, Value::String(v));
        }
    }
    Ok(())
}

/// Render the response values a template marks and strip them from the
/// response.
pub fn render_response(
    response: &mut Value,
    template: &Value,
    resolver: &dyn ReferenceResolver,
) -> Result<(), SdkError> {
    for (path, leaf) in flatten(template) {
        let Some(marker) = leaf.as_str().filter(|s| classify(s).is_some()) else {
            continue;
        };
        let reference = Reference::parse(marker);
        let Some(actual) = get_path(response, &path) else {
            warn!("response has no value at {path}");
            continue;
        };
        let text = match actual {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        resolver.render(&reference, &reference.format(&text)?)?;
        remove_path(response, &path);
    }
    Ok(())
}
