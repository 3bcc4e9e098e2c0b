//! Host-side handle of one collect element.
//!
//! The handle never sees a sensitive value. It keeps the options the page
//! configured, mirrors the public state the element frame reports and turns
//! page calls (mount, update, focus, destroy) into bus traffic.

use super::document::{HostEnv, IframeSpec, MountTarget, NodeId};
use super::link::ControllerLink;
use crate::bus::events::{
    element_frame_name, scoped, DestroyFrame, ElementBoot, ElementEvent, ElementState, FrameReady,
    InputEvent, SetValue, DESTROY_FRAME, FRAME_READY, INPUT_EVENT, SET_VALUE,
};
use crate::bus::Subscription;
use crate::elements::options::{merge_options, validate_element_options};
use crate::elements::{ElementOptions, ElementType, EventEmitter, ListenerHandle};
use crate::error::SdkError;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct ElementInner {
    id: String,
    element_type: ElementType,
    frame_name: String,
    link: Arc<ControllerLink>,
    options: Mutex<ElementOptions>,
    state: Mutex<ElementState>,
    node: Mutex<Option<NodeId>>,
    ready: watch::Sender<bool>,
    events: EventEmitter<ElementEvent, ElementState>,
    destroyed: EventEmitter<(), ElementType>,
    subscriptions: Mutex<Vec<Subscription>>,
    boot: Mutex<Option<Subscription>>,
}

/// A collect element as the page sees it. Cheap to clone.
#[derive(Clone)]
pub struct Element {
    inner: Arc<ElementInner>,
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("id", &self.inner.id)
            .field("frame_name", &self.inner.frame_name)
            .finish_non_exhaustive()
    }
}

impl Element {
    /// Options are expected to be validated, with type defaults applied.
    pub(crate) fn new(
        element_type: ElementType,
        options: ElementOptions,
        link: Arc<ControllerLink>,
    ) -> Self {
        let value = element_type
            .carries_value()
            .then(|| options.value.clone())
            .flatten();
        let frame_name = element_frame_name(element_type, &options.name, value.as_deref());
        let state = ElementState {
            element_type: Some(element_type),
            ..Default::default()
        };
        let inner = Arc::new(ElementInner {
            id: Uuid::new_v4().to_string(),
            element_type,
            frame_name,
            link,
            options: Mutex::new(options),
            state: Mutex::new(state),
            node: Mutex::new(None),
            ready: watch::channel(false).0,
            events: EventEmitter::new(),
            destroyed: EventEmitter::new(),
            subscriptions: Mutex::new(Vec::new()),
            boot: Mutex::new(None),
        });
        let element = Self { inner };
        element.listen();
        element
    }

    fn env(&self) -> &HostEnv {
        self.inner.link.env()
    }

    fn listen(&self) {
        let weak = Arc::downgrade(&self.inner);
        let sub = self.env().secure().on(
            &scoped(INPUT_EVENT, self.inner.link.container_id()),
            move |msg, _| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match msg.payload_as::<InputEvent>() {
                    Ok(event) if event.name == inner.frame_name => inner.on_input_event(event),
                    Ok(_) => {}
                    Err(e) => warn!("{e}"),
                }
            },
        );
        lock(&self.inner.subscriptions).push(sub);
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn element_type(&self) -> ElementType {
        self.inner.element_type
    }

    pub fn frame_name(&self) -> &str {
        &self.inner.frame_name
    }

    /// Column the element collects into.
    pub fn name(&self) -> String {
        lock(&self.inner.options).name.clone()
    }

    pub fn container_id(&self) -> &str {
        self.inner.link.container_id()
    }

    /// Insert the element frame under `target`. Mounting again moves it.
    pub fn mount(&self, target: impl Into<MountTarget>) -> Result<(), SdkError> {
        let node = self.env().document.resolve(&target.into())?;
        self.unmount();
        self.arm_boot();
        let env = self.env();
        env.document.attach(
            node,
            IframeSpec {
                name: self.inner.frame_name.clone(),
                src: env.frame_src(self.container_id()),
                hidden: false,
            },
        )?;
        *lock(&self.inner.node) = Some(node);
        debug!("mounted {}", self.inner.frame_name);
        Ok(())
    }

    /// Answer the next readiness announcement of this element's frame with
    /// its type and current options.
    fn arm_boot(&self) {
        let weak: Weak<ElementInner> = Arc::downgrade(&self.inner);
        let sub = self.env().secure().on(
            &scoped(FRAME_READY, self.container_id()),
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
                let boot = ElementBoot {
                    element_type: inner.element_type,
                    options: lock(&inner.options).clone(),
                };
                reply.send_result(Ok(boot));
                lock(&inner.boot).take();
            },
        );
        *lock(&self.inner.boot) = Some(sub);
    }

    pub fn unmount(&self) {
        lock(&self.inner.boot).take();
        if lock(&self.inner.node).take().is_some() {
            let env = self.env();
            env.document
                .remove_frame(&self.inner.frame_name, &env.frame_src(self.container_id()));
            self.inner.ready.send_replace(false);
        }
    }

    pub fn is_mounted(&self) -> bool {
        lock(&self.inner.node).is_some()
    }

    /// Whether the element frame has reported `READY`.
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Wait for the element frame's `READY`, bounded by `ready_timeout`.
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

    /// Merge `patch` into the options and push the changed keys to the
    /// frame.
    pub fn update(&self, patch: &Value) -> Result<(), SdkError> {
        let changed = {
            let mut options = lock(&self.inner.options);
            let (merged, changed) = merge_options(&options, patch)?;
            validate_element_options(self.inner.element_type, Some(&*options), &merged)?;
            *options = merged;
            changed
        };
        if changed.is_empty() {
            return Ok(());
        }
        if lock(&self.inner.options).sensitive {
            lock(&self.inner.state).value = None;
        }
        self.inner.link.emit(
            SET_VALUE,
            &SetValue::Options {
                name: self.inner.frame_name.clone(),
                options: changed,
            },
        );
        Ok(())
    }

    /// Put a value into the element from the page.
    pub fn set_value(&self, value: &str) {
        self.inner.link.emit(
            SET_VALUE,
            &SetValue::Value {
                name: self.inner.frame_name.clone(),
                value: value.to_string(),
            },
        );
    }

    pub fn focus(&self) {
        self.command(ElementEvent::Focus);
    }

    pub fn blur(&self) {
        self.command(ElementEvent::Blur);
    }

    fn command(&self, event: ElementEvent) {
        self.inner.link.emit(
            INPUT_EVENT,
            &InputEvent {
                name: self.inner.frame_name.clone(),
                event,
                value: None,
            },
        );
    }

    /// Last reported state. The value is left out for sensitive elements.
    pub fn get_state(&self) -> ElementState {
        let mut state = lock(&self.inner.state).clone();
        if lock(&self.inner.options).sensitive {
            state.value = None;
        }
        state
    }

    pub fn get_options(&self) -> ElementOptions {
        lock(&self.inner.options).public_view()
    }

    /// Listen for `"FOCUS"`, `"BLUR"`, `"CHANGE"` or `"READY"`.
    pub fn on<F>(&self, event: &str, handler: F) -> Result<ListenerHandle, SdkError>
    where
        F: Fn(&ElementState) + Send + Sync + 'static,
    {
        let event: ElementEvent = event.parse()?;
        Ok(self.on_event(event, handler))
    }

    #[must_use = "dropping the handle removes the listener"]
    pub fn on_event<F>(&self, event: ElementEvent, handler: F) -> ListenerHandle
    where
        F: Fn(&ElementState) + Send + Sync + 'static,
    {
        self.inner.events.on(event, handler)
    }

    /// Runs once the element has been destroyed.
    #[must_use = "dropping the handle removes the listener"]
    pub fn on_destroy<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&ElementType) + Send + Sync + 'static,
    {
        self.inner.destroyed.on((), handler)
    }

    /// Remove the element: the collect controller drops its field first,
    /// then the frame goes and the page's listeners are released.
    pub async fn destroy(&self) -> Result<(), SdkError> {
        let _: Value = self
            .inner
            .link
            .request(
                DESTROY_FRAME,
                &DestroyFrame {
                    name: self.inner.frame_name.clone(),
                },
            )
            .await?;
        self.unmount();
        lock(&self.inner.subscriptions).clear();
        self.inner.events.reset();
        self.inner.destroyed.emit(&(), &self.inner.element_type);
        self.inner.destroyed.reset();
        debug!("destroyed {}", self.inner.frame_name);
        Ok(())
    }
}

impl ElementInner {
    fn on_input_event(&self, event: InputEvent) {
        let state = {
            let mut state = lock(&self.state);
            if let Some(mut incoming) = event.value {
                if lock(&self.options).sensitive {
                    incoming.value = None;
                }
                incoming.element_type = Some(self.element_type);
                *state = incoming;
            }
            match event.event {
                ElementEvent::Focus => state.is_focused = true,
                ElementEvent::Blur => state.is_focused = false,
                ElementEvent::Ready => {
                    self.ready.send_replace(true);
                }
                ElementEvent::Change => {}
            }
            state.clone()
        };
        self.events.emit(&event.event, &state);
    }
}
