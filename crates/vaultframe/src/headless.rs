//! In-process page.
//!
//! `HeadlessBrowser` plays both sides of the frame boundary on one bus: it
//! is the host page's `Document`, and every iframe the host attaches is
//! loaded as the matching secure frame (controller, element or reveal) on
//! the secure origin. Frame loads run as tokio tasks, the way real frames
//! load concurrently with the page.

use crate::bus::events::{is_controller_name, FRAME_ELEMENT, FRAME_REVEAL};
use crate::bus::Bus;
use crate::client::VaultTransport;
use crate::config::ControllerOptions;
use crate::error::SdkError;
use crate::frame::{CollectFrame, FrameController, FrameDirectory, RevealFrame, SecureEnv};
use crate::host::{Document, IframeSpec, MountTarget, NodeId};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const HOST_ORIGIN: &str = "https://merchant.example";
pub const SECURE_ORIGIN: &str = "https://frames.vaultframe.example";

/// A secure frame loaded into the page.
#[derive(Clone)]
pub enum LoadedFrame {
    Controller(Arc<FrameController>),
    Collect(Arc<CollectFrame>),
    Reveal(Arc<RevealFrame>),
}

struct Attached {
    spec: IframeSpec,
    node: Option<NodeId>,
    frame: Option<LoadedFrame>,
}

#[derive(Default)]
struct Page {
    nodes: BTreeMap<String, NodeId>,
    next_node: u64,
    frames: Vec<Attached>,
    paused: bool,
    loads: Vec<JoinHandle<()>>,
}

pub struct HeadlessBrowser {
    bus: Bus,
    origin: String,
    secure_origin: String,
    directory: FrameDirectory,
    transport: Arc<dyn VaultTransport>,
    options: ControllerOptions,
    retries: u32,
    page: Mutex<Page>,
}

impl HeadlessBrowser {
    pub fn new(transport: Arc<dyn VaultTransport>) -> Self {
        Self {
            bus: Bus::new(),
            origin: HOST_ORIGIN.to_string(),
            secure_origin: SECURE_ORIGIN.to_string(),
            directory: FrameDirectory::new(),
            transport,
            options: ControllerOptions::default(),
            retries: 0,
            page: Mutex::new(Page::default()),
        }
    }

    pub fn with_origins(mut self, host: impl Into<String>, secure: impl Into<String>) -> Self {
        self.origin = host.into();
        self.secure_origin = secure.into();
        self
    }

    /// Timeouts applied by the secure frames.
    pub fn with_options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_node(self, selector: &str) -> Self {
        self.add_node(selector);
        self
    }

    fn page(&self) -> MutexGuard<'_, Page> {
        self.page.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a node the host can mount into.
    pub fn add_node(&self, selector: &str) -> NodeId {
        let mut page = self.page();
        if let Some(node) = page.nodes.get(selector) {
            return *node;
        }
        let node = NodeId(page.next_node);
        page.next_node += 1;
        page.nodes.insert(selector.to_string(), node);
        node
    }

    pub fn node(&self, selector: &str) -> Option<NodeId> {
        self.page().nodes.get(selector).copied()
    }

    /// Hold back frame loads. Frames attached while paused stay unloaded
    /// until `resume`.
    pub fn pause(&self) {
        self.page().paused = true;
    }

    pub fn resume(&self) -> Result<(), SdkError> {
        let waiting: Vec<IframeSpec> = {
            let mut page = self.page();
            page.paused = false;
            page.frames
                .iter()
                .filter(|f| f.frame.is_none())
                .map(|f| f.spec.clone())
                .collect()
        };
        for spec in waiting {
            let frame = self.load(&spec)?;
            let mut page = self.page();
            if let Some(slot) = page
                .frames
                .iter_mut()
                .find(|f| f.spec == spec && f.frame.is_none())
            {
                slot.frame = Some(frame);
            }
        }
        Ok(())
    }

    /// Wait until every frame load started so far has finished, including
    /// loads started while waiting.
    pub async fn settle(&self) {
        loop {
            let loads = std::mem::take(&mut self.page().loads);
            if loads.is_empty() {
                break;
            }
            for load in loads {
                if let Err(e) = load.await {
                    warn!("frame load panicked: {e}");
                }
            }
        }
    }

    pub fn secure_env(&self) -> SecureEnv {
        SecureEnv {
            bus: self.bus.clone(),
            origin: self.secure_origin.clone(),
            host_origin: self.origin.clone(),
            directory: self.directory.clone(),
            transport: self.transport.clone(),
            options: self.options,
            retries: self.retries,
        }
    }

    pub fn directory(&self) -> &FrameDirectory {
        &self.directory
    }

    /// Names of the attached iframes, in attach order.
    pub fn frame_names(&self) -> Vec<String> {
        self.page().frames.iter().map(|f| f.spec.name.clone()).collect()
    }

    pub fn is_attached(&self, name: &str) -> bool {
        self.page().frames.iter().any(|f| f.spec.name == name)
    }

    /// Node an iframe was attached under; `None` for hidden frames.
    pub fn parent_of(&self, name: &str) -> Option<NodeId> {
        self.page()
            .frames
            .iter()
            .rev()
            .find(|f| f.spec.name == name)
            .and_then(|f| f.node)
    }

    fn loaded(&self, name: &str) -> Option<LoadedFrame> {
        self.loaded_where(|spec| spec.name == name)
    }

    fn loaded_where(&self, pick: impl Fn(&IframeSpec) -> bool) -> Option<LoadedFrame> {
        self.page()
            .frames
            .iter()
            .rev()
            .find(|f| pick(&f.spec))
            .and_then(|f| f.frame.clone())
    }

    pub fn controller(&self, name: &str) -> Option<Arc<FrameController>> {
        match self.loaded(name)? {
            LoadedFrame::Controller(c) => Some(c),
            _ => None,
        }
    }

    pub fn collect_frame(&self, name: &str) -> Option<Arc<CollectFrame>> {
        match self.loaded(name)? {
            LoadedFrame::Collect(f) => Some(f),
            _ => None,
        }
    }

    /// Element frame `name` of one container. Containers may each hold a
    /// field of the same name.
    pub fn collect_frame_in(&self, container_id: &str, name: &str) -> Option<Arc<CollectFrame>> {
        let src = format!("{}#{container_id}", self.frame_url());
        match self.loaded_where(|spec| spec.name == name && spec.src == src)? {
            LoadedFrame::Collect(f) => Some(f),
            _ => None,
        }
    }

    pub fn reveal_frame(&self, name: &str) -> Option<Arc<RevealFrame>> {
        match self.loaded(name)? {
            LoadedFrame::Reveal(f) => Some(f),
            _ => None,
        }
    }

    fn track(&self, load: JoinHandle<()>) {
        self.page().loads.push(load);
    }

    /// Build the secure frame behind `spec` and start loading it.
    fn load(&self, spec: &IframeSpec) -> Result<LoadedFrame, SdkError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| SdkError::ChannelClosed(format!("{}: no async runtime", spec.name)))?;
        let env = self.secure_env();
        let name = spec.name.as_str();
        let prefix = name.split(':').next().unwrap_or_default();
        debug!("loading {name}");

        let frame = if is_controller_name(name) {
            let controller = FrameController::new(name, &spec.src, env)?;
            let task = controller.clone();
            self.track(handle.spawn(async move {
                if let Err(e) = task.load().await {
                    warn!("{} failed to load: {e}", task.name());
                }
            }));
            LoadedFrame::Controller(controller)
        } else if prefix == FRAME_ELEMENT {
            let frame = CollectFrame::new(name, &spec.src, env)?;
            let task = frame.clone();
            let label = spec.name.clone();
            self.track(handle.spawn(async move {
                if let Err(e) = task.load().await {
                    warn!("{label} failed to load: {e}");
                }
            }));
            LoadedFrame::Collect(frame)
        } else if prefix == FRAME_REVEAL {
            let frame = RevealFrame::new(name, &spec.src, env)?;
            let task = frame.clone();
            let label = spec.name.clone();
            self.track(handle.spawn(async move {
                if let Err(e) = task.load().await {
                    warn!("{label} failed to load: {e}");
                }
            }));
            LoadedFrame::Reveal(frame)
        } else {
            return Err(SdkError::FrameNotFound(name.to_string()));
        };
        Ok(frame)
    }

    fn insert(&self, node: Option<NodeId>, spec: IframeSpec) -> Result<(), SdkError> {
        let paused = self.page().paused;
        let frame = if paused { None } else { Some(self.load(&spec)?) };
        self.page().frames.push(Attached { spec, node, frame });
        Ok(())
    }
}

impl Document for HeadlessBrowser {
    fn bus(&self) -> Bus {
        self.bus.clone()
    }

    fn origin(&self) -> String {
        self.origin.clone()
    }

    fn secure_origin(&self) -> String {
        self.secure_origin.clone()
    }

    fn frame_url(&self) -> String {
        format!("{}/frame.html", self.secure_origin)
    }

    fn resolve(&self, target: &MountTarget) -> Result<NodeId, SdkError> {
        let page = self.page();
        match target {
            MountTarget::Selector(selector) => page
                .nodes
                .get(selector)
                .copied()
                .ok_or_else(|| SdkError::InvalidSelector(selector.clone())),
            MountTarget::Node(node) => page
                .nodes
                .values()
                .find(|n| *n == node)
                .copied()
                .ok_or_else(|| SdkError::InvalidSelector(format!("node {}", node.0))),
        }
    }

    fn attach(&self, node: NodeId, frame: IframeSpec) -> Result<(), SdkError> {
        self.resolve(&MountTarget::Node(node))?;
        self.insert(Some(node), frame)
    }

    fn attach_hidden(&self, frame: IframeSpec) -> Result<(), SdkError> {
        self.insert(None, frame)
    }

    fn remove_frame(&self, name: &str, src: &str) {
        let removed: Vec<Attached> = {
            let mut page = self.page();
            let (gone, kept) = std::mem::take(&mut page.frames)
                .into_iter()
                .partition(|f| f.spec.name == name && f.spec.src == src);
            page.frames = kept;
            gone
        };
        if !removed.is_empty() {
            self.directory.remove(name, src);
            debug!("removed {name}");
        }
    }
}
