//! Shared physical serial lines
//!
//! Several logical handles can poll different devices on one RS-485 bus. The
//! registry maps a port name to a single [`SharedLine`] which opens the
//! physical port for the first handle and closes it after the last one.

use crate::serial::{SerialMedia, SerialSettings};
use crate::transaction::TransactionLock;
use bytes::BytesMut;
use once_cell::sync::Lazy;
use spodes_core::{Media, MediaResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Duration;
use tokio::sync::Mutex;

static GLOBAL_REGISTRY: Lazy<Arc<SharedLineRegistry>> =
    Lazy::new(|| Arc::new(SharedLineRegistry::new()));

/// Result of detaching one handle from a shared line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRelease {
    /// The last handle left; the physical line was closed
    Closed(Duration),
    /// Other handles are still attached; the line stays open
    StillInUse { remaining: usize },
}

/// A physical line plus the number of handles attached to it
///
/// Two independent locks guard a line:
/// - the admission lock serializes changes of the connection count and the
///   physical open/close that go with them;
/// - the [`TransactionLock`] keeps request/response exchanges of different
///   handles from interleaving on the wire.
///
/// Admission never waits for the transaction lock.
pub struct SharedLine {
    port: String,
    media: Mutex<Box<dyn Media>>,
    connections: Mutex<usize>,
    transaction: TransactionLock,
}

impl SharedLine {
    pub fn new(port: impl Into<String>, media: Box<dyn Media>) -> Self {
        Self {
            port: port.into(),
            media: Mutex::new(media),
            connections: Mutex::new(0),
            transaction: TransactionLock::new(),
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn transaction_lock(&self) -> &TransactionLock {
        &self.transaction
    }

    /// Number of handles currently attached
    pub async fn connection_count(&self) -> usize {
        *self.connections.lock().await
    }

    /// Liveness of the physical line
    ///
    /// A line whose media is locked is in the middle of I/O for some handle
    /// and is reported as open.
    pub fn is_open(&self) -> bool {
        match self.media.try_lock() {
            Ok(media) => media.is_open(),
            Err(_) => true,
        }
    }

    /// Register one more handle, opening the physical line on the first one
    ///
    /// If the physical open fails the count is left unchanged so the caller can
    /// retry later.
    pub async fn attach(&self) -> MediaResult<Duration> {
        let mut count = self.connections.lock().await;
        let elapsed = if *count == 0 {
            let elapsed = self.media.lock().await.open().await?;
            log::info!("{}: physical line opened", self.port);
            elapsed
        } else {
            Duration::ZERO
        };
        *count += 1;
        log::debug!("{}: {} connection(s)", self.port, *count);
        Ok(elapsed)
    }

    /// Reopen the physical line for an attached handle after an I/O failure
    pub async fn reopen(&self) -> MediaResult<Duration> {
        let count = self.connections.lock().await;
        let mut media = self.media.lock().await;
        if *count == 0 || media.is_open() {
            return Ok(Duration::ZERO);
        }
        let elapsed = media.open().await?;
        log::info!("{}: physical line reopened", self.port);
        Ok(elapsed)
    }

    /// Unregister one handle, closing the physical line after the last one
    ///
    /// The count saturates at zero: an unmatched detach closes nothing.
    pub async fn detach(&self) -> MediaResult<LineRelease> {
        let mut count = self.connections.lock().await;
        match *count {
            0 => Ok(LineRelease::Closed(Duration::ZERO)),
            1 => {
                *count = 0;
                let elapsed = self.media.lock().await.close().await?;
                log::info!("{}: physical line closed", self.port);
                Ok(LineRelease::Closed(elapsed))
            }
            n => {
                *count = n - 1;
                Ok(LineRelease::StillInUse { remaining: n - 1 })
            }
        }
    }

    pub(crate) async fn send(&self, data: &[u8]) -> MediaResult<()> {
        self.media.lock().await.send(data).await
    }

    pub(crate) async fn receive(&self, buf: &mut BytesMut) -> MediaResult<bool> {
        self.media.lock().await.receive(buf).await
    }
}

impl fmt::Debug for SharedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedLine")
            .field("port", &self.port)
            .field("in_transaction", &self.transaction.is_held())
            .finish()
    }
}

/// Table of shared lines keyed by port name
///
/// Construct one per process (or per test) and share it through `Arc`, or
/// use [`SharedLineRegistry::global`]. Entries live as long as the registry
/// unless explicitly unregistered while idle.
#[derive(Debug, Default)]
pub struct SharedLineRegistry {
    lines: SyncMutex<HashMap<String, Arc<SharedLine>>>,
}

impl SharedLineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    pub fn global() -> Arc<SharedLineRegistry> {
        Arc::clone(&*GLOBAL_REGISTRY)
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<SharedLine>>> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Line for `port`, created with `make` on first use
    ///
    /// Later calls for the same port return the existing line and ignore
    /// `make`.
    pub fn line_with<F>(&self, port: &str, make: F) -> Arc<SharedLine>
    where
        F: FnOnce() -> Box<dyn Media>,
    {
        let mut table = self.table();
        Arc::clone(
            table
                .entry(port.to_string())
                .or_insert_with(|| Arc::new(SharedLine::new(port, make()))),
        )
    }

    /// Serial line for the port named in `settings`
    pub fn line(&self, settings: &SerialSettings) -> Arc<SharedLine> {
        self.line_with(&settings.port_name, || {
            Box::new(SerialMedia::new(settings.clone()))
        })
    }

    pub fn get(&self, port: &str) -> Option<Arc<SharedLine>> {
        self.table().get(port).cloned()
    }

    pub fn ports(&self) -> Vec<String> {
        let mut ports: Vec<String> = self.table().keys().cloned().collect();
        ports.sort();
        ports
    }

    /// Connection count of `port`, zero for unknown ports
    pub async fn connection_count(&self, port: &str) -> usize {
        match self.get(port) {
            Some(line) => line.connection_count().await,
            None => 0,
        }
    }

    /// Remove an idle line
    ///
    /// # Returns
    ///
    /// `false` if the port is unknown or handles are still attached
    pub async fn unregister(&self, port: &str) -> bool {
        let Some(line) = self.get(port) else {
            return false;
        };
        let count = line.connections.lock().await;
        if *count > 0 {
            return false;
        }
        let mut table = self.table();
        match table.get(port) {
            Some(current) if Arc::ptr_eq(current, &line) => {
                table.remove(port);
                true
            }
            _ => false,
        }
    }
}
