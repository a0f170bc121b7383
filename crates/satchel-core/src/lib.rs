//! satchel-core — wire format and configuration.
//! All other Satchel crates depend on this one.

pub mod config;
pub mod wire;

pub use wire::{AttachmentFrame, Frame, FrameError};
