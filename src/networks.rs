//! Connections that carry frames between devices.

mod wire;
pub use wire::{Attachment, Wire};
