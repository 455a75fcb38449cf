//! Invoked elements and the lifecycle of the files declaring them.

mod element;
mod file_manager;

pub use element::{ElementDescriptor, ElementKey, InvocationRecord, InvokedElement, CONSTRUCTOR_NAME};
pub use file_manager::{FileState, InvokedFileManager};
