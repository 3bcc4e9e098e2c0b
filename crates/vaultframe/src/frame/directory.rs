//! Live frames of the secure origin.

use super::field::FormField;
use crate::error::SdkError;
use std::sync::{Arc, Mutex, MutexGuard};

/// A loaded secure frame as seen by its same-origin siblings.
pub trait FrameWindow: Send + Sync {
    fn name(&self) -> &str;

    /// URL the frame was loaded from.
    fn location(&self) -> &str;

    /// Hand the frame the field it displays.
    fn boot(&self, _field: Arc<FormField>) -> Result<(), SdkError> {
        Err(SdkError::FrameNotFound(self.name().to_string()))
    }

    fn field(&self) -> Option<Arc<FormField>> {
        None
    }

    /// Show a value inside the frame without handing it to anyone.
    fn render(&self, value: &str) -> Result<(), SdkError>;

    /// Token shown by a reveal frame.
    fn reveal_token(&self) -> Option<String> {
        None
    }
}

#[derive(Clone, Default)]
pub struct FrameDirectory {
    frames: Arc<Mutex<Vec<Arc<dyn FrameWindow>>>>,
}

impl FrameDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn FrameWindow>>> {
        self.frames.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a frame, replacing a previous load of the same frame.
    pub fn register(&self, frame: Arc<dyn FrameWindow>) {
        let mut frames = self.lock();
        frames.retain(|f| f.name() != frame.name() || f.location() != frame.location());
        frames.push(frame);
    }

    pub fn remove(&self, name: &str, location: &str) -> Option<Arc<dyn FrameWindow>> {
        let mut frames = self.lock();
        let i = frames
            .iter()
            .position(|f| f.name() == name && f.location() == location)?;
        Some(frames.remove(i))
    }

    /// Frame with this name loaded from this location.
    pub fn find(&self, name: &str, location: &str) -> Option<Arc<dyn FrameWindow>> {
        self.lock()
            .iter()
            .find(|f| f.name() == name && f.location() == location)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub(&'static str, &'static str);

    impl FrameWindow for Stub {
        fn name(&self) -> &str {
            self.0
        }
        fn location(&self) -> &str {
            self.1
        }
        fn render(&self, _value: &str) -> Result<(), SdkError> {
            Ok(())
        }
    }

    #[test]
    fn test_find_matches_name_and_location() {
        let directory = FrameDirectory::new();
        directory.register(Arc::new(Stub("element:cvv:c", "https://secure/frame#a")));
        directory.register(Arc::new(Stub("element:pin:p", "https://secure/frame#b")));

        assert!(directory.find("element:cvv:c", "https://secure/frame#a").is_some());
        assert!(directory.find("element:cvv:c", "https://secure/frame#b").is_none());

        directory.register(Arc::new(Stub("element:cvv:c", "https://secure/frame#b")));
        directory.register(Arc::new(Stub("element:cvv:c", "https://secure/frame#b")));
        assert_eq!(directory.len(), 3);
        assert!(directory.find("element:cvv:c", "https://secure/frame#b").is_some());

        assert!(directory.remove("element:pin:p", "https://secure/frame#b").is_some());
        assert!(directory.find("element:pin:p", "https://secure/frame#b").is_none());
    }
}
