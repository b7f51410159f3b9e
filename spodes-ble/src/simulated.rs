//! In-process BLE simulator
//!
//! A simulated meter exposing the DLMS GATT service. It acknowledges every
//! chunk written to the send characteristic and, once a complete frame has
//! arrived, answers it through receive-characteristic notifications. Used for
//! testing without BLE hardware.

use crate::gatt::{CharacteristicInfo, DiscoveredDevice, GattAdapter, GattClient, NotificationHandler};
use crate::{
    DLMS_READY_UUID, DLMS_RECV_BUF_UUID, DLMS_SEND_BUF_UUID, DLMS_SERVICE_UUID, READY_OK,
    SEND_BUF_SIZE,
};
use async_trait::async_trait;
use bytes::BytesMut;
use spodes_core::{MediaError, MediaResult, is_frame_complete};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// How the simulated meter answers written chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckMode {
    /// Acknowledge with the ready value
    Ready,
    /// Never acknowledge
    Silent,
    /// Acknowledge with an arbitrary value
    Reply(Vec<u8>),
}

/// Computes the answer to a complete request frame
pub type Responder = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

type SharedHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A simulated meter
pub struct SimPeripheral {
    address: String,
    name: Option<String>,
    services: Vec<Uuid>,
    max_write_size: usize,
    notify_size: usize,
    ack_mode: AckMode,
    latency: Duration,
    discovery_delay: Duration,
    responder: Responder,
    readable: Vec<(CharacteristicInfo, Vec<u8>)>,
    connected: AtomicBool,
    handlers: Mutex<HashMap<Uuid, SharedHandler>>,
    request: Mutex<BytesMut>,
    writes: Mutex<Vec<Vec<u8>>>,
}

impl SimPeripheral {
    /// Meter offering the DLMS service, 20 byte writes, echoing every frame
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            services: vec![DLMS_SERVICE_UUID],
            max_write_size: SEND_BUF_SIZE,
            notify_size: SEND_BUF_SIZE,
            ack_mode: AckMode::Ready,
            latency: Duration::from_millis(1),
            discovery_delay: Duration::ZERO,
            responder: Box::new(|request: &[u8]| Some(request.to_vec())),
            readable: Vec::new(),
            connected: AtomicBool::new(false),
            handlers: Mutex::new(HashMap::new()),
            request: Mutex::new(BytesMut::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn without_dlms_service(mut self) -> Self {
        self.services.retain(|uuid| *uuid != DLMS_SERVICE_UUID);
        self
    }

    pub fn with_max_write_size(mut self, size: usize) -> Self {
        self.max_write_size = size;
        self
    }

    /// Size of the notification chunks carrying answers
    pub fn with_notify_size(mut self, size: usize) -> Self {
        self.notify_size = size.max(1);
        self
    }

    pub fn with_ack_mode(mut self, mode: AckMode) -> Self {
        self.ack_mode = mode;
        self
    }

    /// Delay before each acknowledgment and answer notification
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delay before the service list is reported after connecting
    pub fn with_discovery_delay(mut self, delay: Duration) -> Self {
        self.discovery_delay = delay;
        self
    }

    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = responder;
        self
    }

    pub fn with_readable(mut self, description: &str, uuid: Uuid, value: Vec<u8>) -> Self {
        let info = CharacteristicInfo {
            uuid,
            description: description.to_string(),
            readable: true,
        };
        self.readable.push((info, value));
        self
    }

    /// Chunks written to the send characteristic so far
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.writes).clone()
    }

    /// Simulate the link going away without a disconnect request
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Push raw bytes through the receive characteristic right away
    pub fn notify_data(&self, data: &[u8]) {
        if let Some(handler) = self.handler(DLMS_RECV_BUF_UUID) {
            handler(data);
        }
    }

    fn handler(&self, characteristic: Uuid) -> Option<SharedHandler> {
        lock(&self.handlers).get(&characteristic).cloned()
    }

    fn discovered(&self) -> DiscoveredDevice {
        DiscoveredDevice {
            address: self.address.clone(),
            name: self.name.clone(),
            rssi: Some(-60),
        }
    }

    fn acknowledge(&self) {
        let value = match &self.ack_mode {
            AckMode::Ready => READY_OK.to_vec(),
            AckMode::Silent => return,
            AckMode::Reply(value) => value.clone(),
        };
        if let Some(handler) = self.handler(DLMS_READY_UUID) {
            let latency = self.latency;
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                handler(value.as_slice());
            });
        }
    }

    fn answer(&self, request: &[u8]) {
        let Some(response) = (self.responder)(request) else {
            return;
        };
        let Some(handler) = self.handler(DLMS_RECV_BUF_UUID) else {
            return;
        };
        let latency = self.latency;
        let notify_size = self.notify_size;
        tokio::spawn(async move {
            for chunk in response.chunks(notify_size) {
                tokio::time::sleep(latency).await;
                handler(chunk);
            }
        });
    }
}

#[async_trait]
impl GattClient for SimPeripheral {
    fn address(&self) -> &str {
        &self.address
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> MediaResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.handlers).clear();
        lock(&self.request).clear();
        Ok(())
    }

    async fn services(&self) -> MediaResult<Vec<Uuid>> {
        if !self.discovery_delay.is_zero() {
            tokio::time::sleep(self.discovery_delay).await;
        }
        Ok(self.services.clone())
    }

    async fn characteristics(&self) -> MediaResult<Vec<CharacteristicInfo>> {
        Ok(self.readable.iter().map(|(info, _)| info.clone()).collect())
    }

    fn max_write_size(&self) -> usize {
        self.max_write_size
    }

    async fn subscribe(&self, characteristic: Uuid, handler: NotificationHandler) -> MediaResult<()> {
        if !self.is_connected() {
            return Err(MediaError::not_connected("simulated peripheral not connected"));
        }
        lock(&self.handlers).insert(characteristic, Arc::from(handler));
        Ok(())
    }

    async fn write(&self, characteristic: Uuid, data: &[u8], _with_response: bool) -> MediaResult<()> {
        if !self.is_connected() {
            return Err(MediaError::not_connected("simulated peripheral not connected"));
        }
        if characteristic != DLMS_SEND_BUF_UUID {
            return Err(MediaError::Protocol(format!("characteristic {} is not writable", characteristic)));
        }
        if data.len() > self.max_write_size {
            return Err(MediaError::Protocol(format!(
                "write of {} bytes exceeds {}",
                data.len(),
                self.max_write_size
            )));
        }
        lock(&self.writes).push(data.to_vec());

        let complete = {
            let mut request = lock(&self.request);
            request.extend_from_slice(data);
            if is_frame_complete(&request) {
                Some(request.split().freeze())
            } else {
                None
            }
        };
        self.acknowledge();
        if let Some(request) = complete {
            self.answer(&request);
        }
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> MediaResult<Vec<u8>> {
        self.readable
            .iter()
            .find(|(info, _)| info.uuid == characteristic)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| MediaError::Protocol(format!("characteristic {} not readable", characteristic)))
    }
}

/// Simulated BLE stack holding a set of peripherals
#[derive(Default)]
pub struct SimAdapter {
    peripherals: Mutex<HashMap<String, Arc<SimPeripheral>>>,
    connect_delay: Mutex<Duration>,
}

impl SimAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, peripheral: Arc<SimPeripheral>) {
        lock(&self.peripherals).insert(peripheral.address.clone(), peripheral);
    }

    /// Delay applied to every connect, to exercise connect timeouts
    pub fn set_connect_delay(&self, delay: Duration) {
        *lock(&self.connect_delay) = delay;
    }
}

#[async_trait]
impl GattAdapter for SimAdapter {
    async fn connect(&self, address: &str, _pairing: bool) -> MediaResult<Arc<dyn GattClient>> {
        let delay = *lock(&self.connect_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let peripheral = lock(&self.peripherals).get(address).cloned();
        match peripheral {
            Some(peripheral) => {
                peripheral.connected.store(true, Ordering::SeqCst);
                Ok(peripheral as Arc<dyn GattClient>)
            }
            None => Err(MediaError::Connection(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("device {} not found", address),
            ))),
        }
    }

    async fn discover(&self, _timeout: Duration) -> MediaResult<HashMap<String, DiscoveredDevice>> {
        Ok(lock(&self.peripherals)
            .values()
            .map(|p| (p.address.clone(), p.discovered()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_requires_connection() {
        let peripheral = SimPeripheral::new("AA:BB:CC:DD:EE:FF");
        let err = peripheral.write(DLMS_SEND_BUF_UUID, &[0x7E], true).await.unwrap_err();
        assert!(matches!(err, MediaError::Connection(_)));
    }

    #[tokio::test]
    async fn test_oversized_write_rejected() {
        let adapter = SimAdapter::new();
        adapter.add(Arc::new(SimPeripheral::new("AA:BB:CC:DD:EE:FF").with_max_write_size(4)));
        let client = adapter.connect("AA:BB:CC:DD:EE:FF", false).await.unwrap();
        assert!(client.write(DLMS_SEND_BUF_UUID, &[0u8; 5], true).await.is_err());
        assert!(client.write(DLMS_SEND_BUF_UUID, &[0u8; 4], true).await.is_ok());
    }

    #[tokio::test]
    async fn test_discover_lists_peripherals() {
        let adapter = SimAdapter::new();
        adapter.add(Arc::new(SimPeripheral::new("AA:BB:CC:DD:EE:FF").with_name("meter")));
        let found = adapter.discover(Duration::from_millis(10)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["AA:BB:CC:DD:EE:FF"].name.as_deref(), Some("meter"));
    }
}
