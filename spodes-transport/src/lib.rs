//! Stream media for SPODES devices
//!
//! This crate provides `Media` implementations over byte streams: TCP, an
//! exclusively owned serial port, and RS-485 handles multiplexed over a shared
//! serial line.

pub mod rs485;
pub mod serial;
pub mod shared;
pub mod stream;
pub mod tcp;
pub mod transaction;

pub use rs485::Rs485Media;
pub use serial::{DEFAULT_BAUD_RATE, SerialMedia, SerialSettings};
pub use shared::{LineRelease, SharedLine, SharedLineRegistry};
pub use spodes_core::{Media, MediaError, MediaResult, TimeoutPolicy};
pub use stream::FramedStream;
pub use tcp::{DEFAULT_PORT, NetworkMedia, NetworkSettings, is_connect_limit_error};
pub use transaction::{Transaction, TransactionGuard, TransactionLock};
