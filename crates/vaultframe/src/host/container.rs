//! Collect container: creates elements and tokenizes what they hold.

use super::element::Element;
use super::link::ControllerLink;
use super::registry::{ElementIndex, IndexedElement};
use crate::bus::events::{element_frame_name, TokenizationRequest, TOKENIZATION_REQUEST};
use crate::elements::options::validate_element_options;
use crate::elements::{ElementOptions, ElementType, ListenerHandle};
use crate::error::SdkError;
use crate::records::{self, CollectOptions, InsertResponse};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

struct Entry {
    element: Element,
    _on_destroy: ListenerHandle,
}

type Entries = Arc<Mutex<BTreeMap<String, Entry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, BTreeMap<String, Entry>> {
    entries.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct CollectContainer {
    id: String,
    link: Arc<ControllerLink>,
    index: ElementIndex,
    entries: Entries,
}

impl CollectContainer {
    pub(crate) fn new(link: Arc<ControllerLink>, index: ElementIndex) -> Self {
        Self {
            id: link.container_id().to_string(),
            link,
            index,
            entries: Arc::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Create an element of `element_type` (e.g. `"card_number"`).
    ///
    /// Type defaults fill whatever the options leave out. Two elements with
    /// the same type and name (and option value, for radios and checkboxes)
    /// cannot live in one container.
    pub fn create(&self, element_type: &str, options: ElementOptions) -> Result<Element, SdkError> {
        let element_type: ElementType = element_type.parse()?;
        let options = options.with_type_defaults(element_type);
        validate_element_options(element_type, None, &options)?;

        let value = element_type
            .carries_value()
            .then_some(options.value.as_deref())
            .flatten();
        let frame_name = element_frame_name(element_type, &options.name, value);
        let mut entries = lock(&self.entries);
        if entries.contains_key(&frame_name) {
            return Err(SdkError::DuplicateElement(frame_name));
        }

        let element = Element::new(element_type, options, self.link.clone());
        let weak = Arc::downgrade(&self.entries);
        let index = self.index.clone();
        let (name, id) = (frame_name.clone(), element.id().to_string());
        let on_destroy = element.on_destroy(move |_| {
            if let Some(entries) = weak.upgrade() {
                lock(&entries).remove(&name);
            }
            index.remove(&id);
        });
        self.index
            .insert(element.id(), IndexedElement::Collect(element.clone()));
        entries.insert(
            frame_name.clone(),
            Entry {
                element: element.clone(),
                _on_destroy: on_destroy,
            },
        );
        debug!("created {frame_name}");
        Ok(element)
    }

    /// Element created with this type, name and (for radios and checkboxes)
    /// option value.
    pub fn get_element(
        &self,
        element_type: ElementType,
        name: &str,
        value: Option<&str>,
    ) -> Option<Element> {
        let frame_name = element_frame_name(element_type, name, value);
        lock(&self.entries).get(&frame_name).map(|e| e.element.clone())
    }

    pub fn get_elements(&self) -> Vec<Element> {
        lock(&self.entries).values().map(|e| e.element.clone()).collect()
    }

    /// Tokenize the values of every element.
    ///
    /// Fails with `ElementsNotMounted` before anything is sent when an
    /// element has no frame. Otherwise waits for the controller and every
    /// element frame, then hands the work to the controller, which rejects
    /// invalid or incomplete inputs.
    pub async fn collect(&self, options: CollectOptions) -> Result<InsertResponse, SdkError> {
        if let Some(extra) = &options.additional_fields {
            records::validate_insert(extra)?;
        }
        let elements = self.get_elements();
        let unmounted: Vec<String> = elements
            .iter()
            .filter(|e| !e.is_mounted())
            .map(Element::name)
            .collect();
        if !unmounted.is_empty() {
            return Err(SdkError::ElementsNotMounted(unmounted.join(", ")));
        }

        self.link.wait_ready().await?;
        for element in &elements {
            element.wait_ready().await?;
        }
        let response: InsertResponse = self
            .link
            .request(TOKENIZATION_REQUEST, &TokenizationRequest { options })
            .await?;
        info!("collected {} records", response.records.len());
        Ok(response)
    }
}
