//! Building media from configuration

use crate::config::MediaConfig;
use spodes_ble::{BleMedia, GattAdapter};
use spodes_core::{Media, MediaError, MediaResult};
use spodes_transport::{NetworkMedia, Rs485Media, SerialMedia, SharedLineRegistry};
use std::sync::Arc;

/// Creates media instances from [`MediaConfig`]
///
/// Shared RS-485 handles are registered in the factory's registry, so every
/// handle built for the same port ends up on the same physical line. BLE
/// media need a GATT adapter; without one, BLE configs are rejected.
#[derive(Clone)]
pub struct MediaFactory {
    registry: Arc<SharedLineRegistry>,
    adapter: Option<Arc<dyn GattAdapter>>,
}

impl MediaFactory {
    /// Factory on the process-wide shared-line registry
    pub fn new() -> Self {
        Self::with_registry(SharedLineRegistry::global())
    }

    pub fn with_registry(registry: Arc<SharedLineRegistry>) -> Self {
        Self {
            registry,
            adapter: None,
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn GattAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn registry(&self) -> &Arc<SharedLineRegistry> {
        &self.registry
    }

    /// Build a closed media for `config`
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when a value is out of range, or for a BLE config
    /// without an adapter
    pub fn build(&self, config: &MediaConfig) -> MediaResult<Box<dyn Media>> {
        match config {
            MediaConfig::Network(network) => {
                let settings = network.settings()?;
                log::debug!("building network media {}:{}", settings.host, settings.port);
                Ok(Box::new(NetworkMedia::new(settings)))
            }
            MediaConfig::Serial(serial) if serial.shared => {
                let settings = serial.settings()?;
                log::debug!("building RS485 media on {}", settings.port_name);
                Ok(Box::new(Rs485Media::new(&self.registry, settings)))
            }
            MediaConfig::Serial(serial) => {
                let settings = serial.settings()?;
                log::debug!("building serial media {}", settings);
                Ok(Box::new(SerialMedia::new(settings)))
            }
            MediaConfig::Ble(ble) => {
                let settings = ble.settings()?;
                let adapter = self.adapter.clone().ok_or_else(|| {
                    MediaError::InvalidConfig("BLE media requires a GATT adapter".to_string())
                })?;
                log::debug!("building BLE media {}", settings.address);
                Ok(Box::new(BleMedia::new(settings, adapter)))
            }
        }
    }
}

impl Default for MediaFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MediaFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaFactory")
            .field("ports", &self.registry.ports())
            .field("ble", &self.adapter.is_some())
            .finish()
    }
}
