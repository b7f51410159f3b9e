//! Timeout policy shared by every media backend

use crate::error::{MediaError, MediaResult};
use std::time::Duration;

/// Bounded waits applied by a media instance
///
/// Every suspension point of a media operation is bounded by one of these
/// values, so no call can block indefinitely:
/// - `connect`: establishing the connection in `open`
/// - `recv`: waiting for more bytes (or for a BLE chunk acknowledgment)
/// - `close`: graceful shutdown before the connection is aborted
/// - `drain`: write plus flush in `send`
/// - `line`: acquiring the transaction lock of a shared RS-485 line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutPolicy {
    pub connect: Duration,
    pub recv: Duration,
    pub close: Duration,
    pub drain: Duration,
    pub line: Duration,
}

impl TimeoutPolicy {
    /// Defaults for TCP media
    pub fn network() -> Self {
        Self {
            connect: Duration::from_secs(60),
            recv: Duration::from_secs(5),
            close: Duration::from_secs(3),
            drain: Duration::from_secs(2),
            line: Duration::from_secs(10),
        }
    }

    /// Defaults for serial and RS-485 media
    pub fn serial() -> Self {
        Self {
            connect: Duration::from_secs(5),
            recv: Duration::from_secs(1),
            close: Duration::from_secs(3),
            drain: Duration::from_secs(2),
            line: Duration::from_secs(10),
        }
    }

    /// Defaults for BLE media
    pub fn ble() -> Self {
        Self {
            connect: Duration::from_secs(10),
            recv: Duration::from_secs(1),
            close: Duration::from_secs(10),
            drain: Duration::from_secs(2),
            line: Duration::from_secs(10),
        }
    }

    pub fn with_connect(mut self, timeout: Duration) -> Self {
        self.connect = timeout;
        self
    }

    pub fn with_recv(mut self, timeout: Duration) -> Self {
        self.recv = timeout;
        self
    }

    pub fn with_close(mut self, timeout: Duration) -> Self {
        self.close = timeout;
        self
    }

    pub fn with_drain(mut self, timeout: Duration) -> Self {
        self.drain = timeout;
        self
    }

    pub fn with_line(mut self, timeout: Duration) -> Self {
        self.line = timeout;
        self
    }

    /// Check that every timeout is a usable bound
    ///
    /// A zero timeout would turn every wait into an immediate failure, so all
    /// values must be strictly positive.
    pub fn validate(&self) -> MediaResult<()> {
        let fields = [
            ("to_connect", self.connect),
            ("to_recv", self.recv),
            ("to_close", self.close),
            ("to_drain", self.drain),
            ("to_line", self.line),
        ];
        for (name, value) in fields {
            if value.is_zero() {
                return Err(MediaError::InvalidConfig(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    /// Convert a configuration value given in seconds
    pub fn seconds(name: &str, value: f64) -> MediaResult<Duration> {
        Duration::try_from_secs_f64(value).map_err(|e| {
            MediaError::InvalidConfig(format!("{name}: invalid duration {value}: {e}"))
        })
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::network()
    }
}
