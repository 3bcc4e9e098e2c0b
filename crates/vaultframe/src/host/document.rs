//! The page the SDK is embedded in.
//!
//! Everything the host side needs from a browser goes through `Document`:
//! the bus, the two origins, node lookup and iframe insertion. A real
//! embedding implements it against its DOM; `HeadlessBrowser` implements it
//! in-process.

use crate::bus::{Bus, BusEndpoint};
use crate::config::ControllerOptions;
use crate::error::SdkError;
use std::sync::Arc;

/// An iframe about to be inserted into the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IframeSpec {
    pub name: String,
    /// `frame_url#container_id`.
    pub src: String,
    pub hidden: bool,
}

/// Opaque handle of a page node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

/// Where to mount an element: a CSS selector or a node handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountTarget {
    Selector(String),
    Node(NodeId),
}

impl From<&str> for MountTarget {
    fn from(selector: &str) -> Self {
        MountTarget::Selector(selector.to_string())
    }
}

impl From<String> for MountTarget {
    fn from(selector: String) -> Self {
        MountTarget::Selector(selector)
    }
}

impl From<NodeId> for MountTarget {
    fn from(node: NodeId) -> Self {
        MountTarget::Node(node)
    }
}

pub trait Document: Send + Sync {
    fn bus(&self) -> Bus;

    /// Origin of the host page.
    fn origin(&self) -> String;

    /// Origin the secure frames are served from.
    fn secure_origin(&self) -> String;

    /// URL every secure frame loads; the container id goes in the fragment.
    fn frame_url(&self) -> String;

    /// Find the node a target points at. Unknown targets are an
    /// `InvalidSelector` error.
    fn resolve(&self, target: &MountTarget) -> Result<NodeId, SdkError>;

    /// Insert a visible iframe under `node`.
    fn attach(&self, node: NodeId, frame: IframeSpec) -> Result<(), SdkError>;

    /// Insert a hidden iframe at the end of the page body.
    fn attach_hidden(&self, frame: IframeSpec) -> Result<(), SdkError>;

    /// Remove the iframe `name` loaded from `src`. Unknown frames are
    /// ignored.
    fn remove_frame(&self, name: &str, src: &str);
}

/// What host-side objects share: the page and the bus endpoint of the host.
#[derive(Clone)]
pub struct HostEnv {
    pub document: Arc<dyn Document>,
    pub endpoint: BusEndpoint,
    pub options: ControllerOptions,
}

impl HostEnv {
    pub fn new(document: Arc<dyn Document>, options: ControllerOptions) -> Self {
        let endpoint = document.bus().endpoint(document.origin());
        Self {
            document,
            endpoint,
            options,
        }
    }

    /// Endpoint that only talks to the secure frames.
    pub fn secure(&self) -> BusEndpoint {
        self.endpoint.target(self.document.secure_origin())
    }

    pub fn frame_src(&self, container_id: &str) -> String {
        format!("{}#{}", self.document.frame_url(), container_id)
    }
}
