//! Elements of one SDK instance, by id.
//!
//! SOAP templates reference elements by id, so every element created
//! through any container of an instance is indexed here.

use super::element::Element;
use super::reveal::RevealElement;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub enum IndexedElement {
    Collect(Element),
    Reveal(RevealElement),
}

#[derive(Clone, Default)]
pub struct ElementIndex {
    entries: Arc<Mutex<BTreeMap<String, IndexedElement>>>,
}

impl ElementIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, IndexedElement>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, id: impl Into<String>, element: IndexedElement) {
        self.lock().insert(id.into(), element);
    }

    pub fn remove(&self, id: &str) -> Option<IndexedElement> {
        self.lock().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<IndexedElement> {
        self.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
