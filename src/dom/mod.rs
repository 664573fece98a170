//! Document collaborator: the parsed tree, its element wrappers, and events.

pub mod document;
pub mod event;

pub use document::{Document, DocumentOptions, Element};
pub use event::{DispatchOutcome, Event, EventTarget};
