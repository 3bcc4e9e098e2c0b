//! Everything that runs on the host page.
//!
//! Host objects hold options, tokens and mirrored public state, never a
//! sensitive value. They reach the secure frames only through the bus and
//! the page only through a `Document`.

pub mod container;
pub mod controller;
pub mod document;
pub mod element;
pub mod link;
pub mod registry;
pub mod reveal;
pub mod sdk;

pub use container::CollectContainer;
pub use controller::ExternalController;
pub use document::{Document, HostEnv, IframeSpec, MountTarget, NodeId};
pub use element::Element;
pub use link::ControllerLink;
pub use registry::{ElementIndex, IndexedElement};
pub use reveal::{RevealContainer, RevealElement, RevealElementInput};
pub use sdk::{Container, ContainerType, VaultFrames};
