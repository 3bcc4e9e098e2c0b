//! Element vocabulary shared by both origins: types, options, masks, and
//! the in-frame event emitter.

pub mod emitter;
pub mod mask;
pub mod options;
pub mod types;

pub use emitter::{EventEmitter, ListenerHandle};
pub use mask::Mask;
pub use options::{DropdownOption, ElementOptions, MaskOptions};
pub use types::ElementType;
