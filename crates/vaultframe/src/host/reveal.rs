//! Reveal elements and their container.
//!
//! A reveal element is a frame that shows one detokenized value. The page
//! only ever holds the token; `RevealContainer::reveal` asks the reveal
//! controller to detokenize and render, and gets back which tokens made it.

use super::document::{HostEnv, IframeSpec, MountTarget, NodeId};
use super::link::ControllerLink;
use super::registry::{ElementIndex, IndexedElement};
use crate::bus::events::{scoped, FrameReady, RevealBoot, RevealRequest, FRAME_READY, REVEAL_REQUEST};
use crate::bus::Subscription;
use crate::connection::json::Reference;
use crate::elements::options::compile_pattern;
use crate::error::SdkError;
use crate::frame::reveal::reveal_frame_name;
use crate::records::{RedactionType, RevealRecord, RevealSummary};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RevealElementInput {
    pub token: Option<String>,
    pub redaction: RedactionType,
    pub label: Option<String>,
    /// Shown until the value is revealed.
    pub alt_text: Option<String>,
    /// Applied to the value when it is rendered from a connection response.
    pub format_regex: Option<String>,
    pub replace_text: Option<String>,
}

impl RevealElementInput {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), SdkError> {
        if self.token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(SdkError::InvalidInput("reveal token must not be blank".into()));
        }
        if let Some(re) = &self.format_regex {
            compile_pattern(re)?;
        }
        if self.replace_text.is_some() && self.format_regex.is_none() {
            return Err(SdkError::InvalidInput(
                "replace text needs a format regex".into(),
            ));
        }
        Ok(())
    }
}

struct RevealInner {
    id: String,
    frame_name: String,
    input: RevealElementInput,
    link: Arc<ControllerLink>,
    node: Mutex<Option<NodeId>>,
    ready: watch::Sender<bool>,
    boot: Mutex<Option<Subscription>>,
}

#[derive(Clone)]
pub struct RevealElement {
    inner: Arc<RevealInner>,
}

impl std::fmt::Debug for RevealElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevealElement")
            .field("id", &self.inner.id)
            .field("frame_name", &self.inner.frame_name)
            .finish_non_exhaustive()
    }
}

impl RevealElement {
    fn new(input: RevealElementInput, link: Arc<ControllerLink>) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            inner: Arc::new(RevealInner {
                frame_name: reveal_frame_name(input.token.as_deref(), &id),
                id,
                input,
                link,
                node: Mutex::new(None),
                ready: watch::channel(false).0,
                boot: Mutex::new(None),
            }),
        }
    }

    fn env(&self) -> &HostEnv {
        self.inner.link.env()
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn frame_name(&self) -> &str {
        &self.inner.frame_name
    }

    pub fn container_id(&self) -> &str {
        self.inner.link.container_id()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.input.token.clone()
    }

    pub fn redaction(&self) -> RedactionType {
        self.inner.input.redaction
    }

    /// How a connection response refers to this element.
    pub fn reference(&self) -> Reference {
        Reference {
            frame: self.inner.frame_name.clone(),
            container: Some(self.container_id().to_string()),
            format_regex: self.inner.input.format_regex.clone(),
            replace_text: self.inner.input.replace_text.clone(),
        }
    }

    pub fn mount(&self, target: impl Into<MountTarget>) -> Result<(), SdkError> {
        let node = self.env().document.resolve(&target.into())?;
        self.unmount();

        let weak = Arc::downgrade(&self.inner);
        let sub = self.env().secure().on(
            &scoped(FRAME_READY, self.inner.link.container_id()),
            move |msg, reply| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let (Ok(frame), Some(reply)) = (msg.payload_as::<FrameReady>(), reply) else {
                    return;
                };
                if frame.name != inner.frame_name {
                    return;
                }
                let boot = RevealBoot {
                    label: inner.input.label.clone(),
                    alt_text: inner.input.alt_text.clone(),
                };
                if reply.send_result(Ok(boot)) {
                    inner.ready.send_replace(true);
                }
                lock(&inner.boot).take();
            },
        );
        *lock(&self.inner.boot) = Some(sub);

        let env = self.env();
        env.document.attach(
            node,
            IframeSpec {
                name: self.inner.frame_name.clone(),
                src: env.frame_src(self.inner.link.container_id()),
                hidden: false,
            },
        )?;
        *lock(&self.inner.node) = Some(node);
        Ok(())
    }

    pub fn unmount(&self) {
        lock(&self.inner.boot).take();
        if lock(&self.inner.node).take().is_some() {
            let env = self.env();
            env.document.remove_frame(
                &self.inner.frame_name,
                &env.frame_src(self.inner.link.container_id()),
            );
            self.inner.ready.send_replace(false);
        }
    }

    pub fn is_mounted(&self) -> bool {
        lock(&self.inner.node).is_some()
    }

    /// Wait until the frame has fetched its label, bounded by
    /// `ready_timeout`.
    pub async fn wait_ready(&self) -> Result<(), SdkError> {
        let mut ready = self.inner.ready.subscribe();
        let wait = async move {
            ready
                .wait_for(|r| *r)
                .await
                .map(|_| ())
                .map_err(|_| SdkError::ChannelClosed(self.inner.frame_name.clone()))
        };
        match self.env().options.ready_timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| SdkError::Timeout(self.inner.frame_name.clone()))?,
            None => wait.await,
        }
    }
}

pub struct RevealContainer {
    id: String,
    link: Arc<ControllerLink>,
    index: ElementIndex,
    elements: Mutex<Vec<RevealElement>>,
}

impl RevealContainer {
    pub(crate) fn new(link: Arc<ControllerLink>, index: ElementIndex) -> Self {
        Self {
            id: link.container_id().to_string(),
            link,
            index,
            elements: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn create(&self, input: RevealElementInput) -> Result<RevealElement, SdkError> {
        input.validate()?;
        let element = RevealElement::new(input, self.link.clone());
        self.index
            .insert(element.id(), IndexedElement::Reveal(element.clone()));
        lock(&self.elements).push(element.clone());
        debug!("created reveal element {}", element.frame_name());
        Ok(element)
    }

    pub fn elements(&self) -> Vec<RevealElement> {
        lock(&self.elements).clone()
    }

    /// Detokenize every element's token and render the values into the
    /// element frames.
    pub async fn reveal(&self) -> Result<RevealSummary, SdkError> {
        let elements = self.elements();
        if elements.is_empty() {
            return Err(SdkError::InvalidInput("no reveal elements to reveal".into()));
        }
        let unmounted: Vec<&str> = elements
            .iter()
            .filter(|e| !e.is_mounted())
            .map(|e| e.frame_name())
            .collect();
        if !unmounted.is_empty() {
            return Err(SdkError::ElementsNotMounted(unmounted.join(", ")));
        }
        let mut records = Vec::with_capacity(elements.len());
        for element in &elements {
            let token = element
                .token()
                .ok_or_else(|| SdkError::ElementMustHaveToken(element.frame_name().to_string()))?;
            records.push(RevealRecord {
                token,
                redaction: element.redaction(),
                frame: element.frame_name().to_string(),
            });
        }

        self.link.wait_ready().await?;
        for element in &elements {
            element.wait_ready().await?;
        }
        let summary: RevealSummary = self
            .link
            .request(REVEAL_REQUEST, &RevealRequest { records })
            .await?;
        info!(
            "revealed {} tokens, {} failed",
            summary.success.len(),
            summary.errors.len()
        );
        Ok(summary)
    }
}
