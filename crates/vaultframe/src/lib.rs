//! vaultframe: collect, tokenize and reveal sensitive data through isolated
//! secure frames.
//!
//! The host page holds `Element` and `RevealElement` handles and only ever
//! sees tokens and public field state. Values live in frames of a separate
//! secure origin; host and frames talk over a cross-frame bus. `host` is the
//! page side, `frame` the secure side, and `headless` runs both in one
//! process.

pub mod bus;
pub mod client;
pub mod config;
pub mod connection;
pub mod elements;
pub mod error;
pub mod frame;
pub mod headless;
pub mod host;
pub mod logging;
pub mod records;

pub use client::{ClientJson, HttpTransport, TokenFn, TokenProvider, VaultTransport};
pub use config::{ClientConfig, Context, ControllerOptions, Env, LogLevel};
pub use connection::{ConnectionConfig, ConnectionValue, SoapConnectionConfig};
pub use elements::{ElementOptions, ElementType, MaskOptions};
pub use error::SdkError;
pub use headless::HeadlessBrowser;
pub use host::{
    CollectContainer, Container, ContainerType, Document, Element, MountTarget, RevealContainer,
    RevealElement, RevealElementInput, VaultFrames,
};
pub use records::{
    CollectOptions, DetokenizeRecord, GetByIdRecord, InsertOptions, InsertRecord, InsertResponse,
    RedactionType, RevealResponse, RevealSummary,
};
