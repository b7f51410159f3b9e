//! Media contract shared by every backend

use crate::error::MediaResult;
use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;

/// Transport handle to a remote meter
///
/// Network, serial, RS-485 and BLE backends all implement this trait so the
/// protocol layer above does not depend on the physical medium.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait Media: Send {
    /// Establish the underlying connection
    ///
    /// Bounded by the connect timeout. May be called again after a failed
    /// attempt; on an already open handle it does nothing.
    ///
    /// # Returns
    ///
    /// Time spent establishing the connection
    async fn open(&mut self) -> MediaResult<Duration>;

    /// Check the liveness of the underlying connection
    fn is_open(&self) -> bool;

    /// Close the connection
    ///
    /// Closing a closed handle succeeds trivially. A shutdown that does not
    /// finish within the close timeout aborts the connection.
    async fn close(&mut self) -> MediaResult<Duration>;

    /// Write `data`, bounded by the drain timeout
    async fn send(&mut self, data: &[u8]) -> MediaResult<()>;

    /// Receive bytes into `buf` until a frame is complete
    ///
    /// # Returns
    ///
    /// `true` when the last byte appended closes a frame, `false` when the
    /// receive timeout elapsed first. Partial bytes stay in `buf` either way.
    async fn receive(&mut self, buf: &mut BytesMut) -> MediaResult<bool>;

    /// Finish the current request/response exchange
    ///
    /// Only shared lines hold anything between `send` and `receive`; for other
    /// media this is a no-op.
    fn end_transaction(&mut self) {}
}
