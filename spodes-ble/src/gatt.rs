//! GATT collaborator interface
//!
//! The BLE stack itself lives outside this crate. Media code talks to it
//! through these traits; an in-process implementation is provided in
//! [`crate::simulated`].

use async_trait::async_trait;
use spodes_core::MediaResult;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Callback invoked by the stack for every characteristic notification
///
/// Runs on the stack's notification path and must not block.
pub type NotificationHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

/// A characteristic as reported by the remote device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub description: String,
    pub readable: bool,
}

/// A device seen while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// An established GATT connection to one peripheral
#[async_trait]
pub trait GattClient: Send + Sync {
    fn address(&self) -> &str;

    /// Check whether the link is still connected
    fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> MediaResult<()>;

    /// UUIDs of the services offered by the peripheral
    async fn services(&self) -> MediaResult<Vec<Uuid>>;

    async fn characteristics(&self) -> MediaResult<Vec<CharacteristicInfo>>;

    /// Largest payload accepted by a single characteristic write
    fn max_write_size(&self) -> usize;

    /// Enable notifications of `characteristic`, delivering them to `handler`
    async fn subscribe(&self, characteristic: Uuid, handler: NotificationHandler) -> MediaResult<()>;

    /// Write `data` to `characteristic`
    ///
    /// With `with_response` the call returns once the peripheral confirmed the
    /// write at the ATT level.
    async fn write(&self, characteristic: Uuid, data: &[u8], with_response: bool) -> MediaResult<()>;

    async fn read(&self, characteristic: Uuid) -> MediaResult<Vec<u8>>;
}

/// Entry point of the BLE stack: scanning and connecting
#[async_trait]
pub trait GattAdapter: Send + Sync {
    /// Connect to the peripheral at `address`
    ///
    /// # Arguments
    ///
    /// * `address` - MAC address, e.g. `"6C:79:B8:C4:DB:E3"`
    /// * `pairing` - Whether the stack should pair with the device
    async fn connect(&self, address: &str, pairing: bool) -> MediaResult<Arc<dyn GattClient>>;

    /// Scan for advertising devices for `timeout`
    async fn discover(&self, timeout: Duration) -> MediaResult<HashMap<String, DiscoveredDevice>>;
}
