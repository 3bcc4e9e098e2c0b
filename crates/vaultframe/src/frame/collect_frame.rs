//! Element frame: one secure input.
//!
//! On load the frame asks the host for its type and options, then tells
//! the collect controller it exists. The controller answers by handing it
//! the `FormField` that keeps its value.

use super::directory::FrameWindow;
use super::element::FrameElement;
use super::field::FormField;
use super::{container_id, SecureEnv};
use crate::bus::events::{
    scoped, ElementBoot, ElementEvent, FrameReady, InputEvent, FRAME_READY, INPUT_EVENT,
};
use crate::error::SdkError;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub struct CollectFrame {
    name: String,
    location: String,
    container_id: String,
    env: SecureEnv,
    boot: Mutex<Option<ElementBoot>>,
    element: Mutex<Option<Arc<FrameElement>>>,
}

impl CollectFrame {
    pub fn new(name: &str, location: &str, env: SecureEnv) -> Result<Arc<Self>, SdkError> {
        Ok(Arc::new(Self {
            name: name.to_string(),
            location: location.to_string(),
            container_id: container_id(location)?,
            env,
            boot: Mutex::new(None),
            element: Mutex::new(None),
        }))
    }

    /// Announce the frame to the host, then to the controller.
    pub async fn load(self: &Arc<Self>) -> Result<(), SdkError> {
        self.env.directory.register(self.clone());
        let ready = FrameReady {
            name: self.name.clone(),
        };
        let boot: ElementBoot = self
            .env
            .to_host()
            .call(
                &scoped(FRAME_READY, &self.container_id),
                &ready,
                self.env.options.ready_timeout,
            )
            .await?;
        debug!("{} booted as {}", self.name, boot.element_type);
        *self.boot.lock().unwrap_or_else(|e| e.into_inner()) = Some(boot);
        self.env
            .to_secure()
            .emit_as(&scoped(FRAME_READY, &self.container_id), &ready);
        Ok(())
    }

    pub fn element(&self) -> Option<Arc<FrameElement>> {
        self.element.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl FrameWindow for CollectFrame {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn boot(&self, field: Arc<FormField>) -> Result<(), SdkError> {
        let boot = self
            .boot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| SdkError::FrameNotFound(self.name.clone()))?;
        let element = FrameElement::mount(field.clone(), boot.options)?;
        *self.element.lock().unwrap_or_else(|e| e.into_inner()) = Some(element);
        self.env.to_host().emit_as(
            &scoped(INPUT_EVENT, &self.container_id),
            &InputEvent {
                name: self.name.clone(),
                event: ElementEvent::Ready,
                value: Some(field.status()),
            },
        );
        Ok(())
    }

    fn field(&self) -> Option<Arc<FormField>> {
        self.element().map(|e| e.field().clone())
    }

    fn render(&self, value: &str) -> Result<(), SdkError> {
        let element = self
            .element()
            .ok_or_else(|| SdkError::FrameNotFound(self.name.clone()))?;
        element.set_display(value);
        Ok(())
    }
}
