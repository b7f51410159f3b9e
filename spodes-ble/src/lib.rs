//! Bluetooth LE media for SPODES devices
//!
//! Meters expose the DLMS payload over a vendor GATT service: requests are
//! written to a send characteristic in small chunks, each acknowledged by a
//! notification of the ready characteristic, and responses arrive as
//! notifications of the receive characteristic.
//!
//! The BLE stack is reached through the [`GattAdapter`] and [`GattClient`]
//! traits. [`simulated`] provides an in-process meter for tests.

pub mod ack;
pub mod chunked;
pub mod gatt;
pub mod inbox;
pub mod media;
pub mod simulated;

use uuid::Uuid;

/// Service offering the DLMS channel
pub const DLMS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ffe5_0000_1000_8000_00805f9b34fb);
/// Characteristic notifying response bytes
pub const DLMS_RECV_BUF_UUID: Uuid = Uuid::from_u128(0x0000fff4_0000_1000_8000_00805f9b34fb);
/// Characteristic accepting request chunks
pub const DLMS_SEND_BUF_UUID: Uuid = Uuid::from_u128(0x0000fff5_0000_1000_8000_00805f9b34fb);
/// Characteristic notifying per-chunk acknowledgments
pub const DLMS_READY_UUID: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/// Chunk size of current firmware
pub const SEND_BUF_SIZE: usize = 20;
/// Chunk size of legacy firmware
pub const SEND_BUF_SIZE_OLD: usize = 1;
/// Acknowledgment value meaning "ready for the next chunk"
pub const READY_OK: &[u8] = &[0x01];

pub use ack::AckSignal;
pub use chunked::ChunkedSender;
pub use gatt::{CharacteristicInfo, DiscoveredDevice, GattAdapter, GattClient, NotificationHandler};
pub use inbox::NotificationInbox;
pub use media::{BleMedia, BleSettings};
