//! Core types for SPODES media
//!
//! This crate provides the error type, timeout policy, frame boundary
//! detection and the `Media` trait used by every transport backend.

pub mod error;
pub mod frame;
pub mod media;
pub mod timeout;

pub use error::{MediaError, MediaResult};
pub use frame::{FLAG, FrameAssembler, is_frame_complete};
pub use media::Media;
#[cfg(any(test, feature = "mock"))]
pub use media::MockMedia;
pub use timeout::TimeoutPolicy;
