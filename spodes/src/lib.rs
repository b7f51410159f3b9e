//! SPODES media - communication channels for SPODES/DLMS meters
//!
//! Every channel implements the [`Media`] trait: `open`, `close`, `send` of a
//! complete frame and `receive` until a frame boundary or timeout. Framing and
//! protocol logic stay with the caller.
//!
//! # Architecture
//!
//! - `spodes-core`: `Media` trait, `MediaError`, `TimeoutPolicy`, frame boundary detection
//! - `spodes-transport`: TCP, serial, and RS-485 handles on shared lines
//! - `spodes-ble`: BLE media with chunked, acknowledged writes
//! - this crate: serde configuration and [`MediaFactory`]
//!
//! # Usage
//!
//! ```no_run
//! use spodes::{MediaConfig, MediaFactory};
//!
//! # async fn run() -> spodes::MediaResult<()> {
//! let config: MediaConfig = serde_json::from_str(
//!     r#"{"media": "network", "host": "192.168.1.100", "port": "4059"}"#,
//! ).unwrap();
//! let mut media = MediaFactory::new().build(&config)?;
//! media.open().await?;
//! media.send(&[0x7E, 0xA0, 0x07, 0x03, 0x21, 0x93, 0x0F, 0x01, 0x7E]).await?;
//! let mut buf = bytes::BytesMut::new();
//! let _complete = media.receive(&mut buf).await?;
//! media.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod factory;

pub use config::{BleConfig, MediaConfig, NetworkConfig, Numeric, SerialConfig};
pub use factory::MediaFactory;
pub use spodes_core::{FLAG, FrameAssembler, Media, MediaError, MediaResult, TimeoutPolicy, is_frame_complete};

pub mod transport {
    pub use spodes_transport::*;
}

pub mod ble {
    pub use spodes_ble::*;
}
