//! BLE media for meters exposing the DLMS GATT service

use crate::ack::AckSignal;
use crate::chunked::ChunkedSender;
use crate::gatt::{DiscoveredDevice, GattAdapter, GattClient};
use crate::inbox::NotificationInbox;
use crate::{DLMS_READY_UUID, DLMS_RECV_BUF_UUID, DLMS_SEND_BUF_UUID, DLMS_SERVICE_UUID};
use async_trait::async_trait;
use bytes::BytesMut;
use spodes_core::{Media, MediaError, MediaResult, TimeoutPolicy};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{timeout, timeout_at};

/// BLE media settings
#[derive(Debug, Clone)]
pub struct BleSettings {
    /// MAC address of the meter
    pub address: String,
    pub timeouts: TimeoutPolicy,
    pub pairing: bool,
    /// Fixed chunk size, overriding the size reported by the link
    pub chunk_size: Option<usize>,
}

impl BleSettings {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeouts: TimeoutPolicy::ble(),
            pairing: false,
            chunk_size: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_pairing(mut self, pairing: bool) -> Self {
        self.pairing = pairing;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }
}

/// BLE media
///
/// Outgoing frames are written to the send characteristic in acknowledged
/// chunks; incoming frames arrive as notifications of the receive
/// characteristic and are collected in a [`NotificationInbox`].
pub struct BleMedia {
    settings: BleSettings,
    adapter: Arc<dyn GattAdapter>,
    client: Option<Arc<dyn GattClient>>,
    sender: ChunkedSender,
    inbox: Arc<NotificationInbox>,
    ack: Arc<AckSignal>,
}

impl BleMedia {
    pub fn new(settings: BleSettings, adapter: Arc<dyn GattAdapter>) -> Self {
        let sender = ChunkedSender::new(
            settings.chunk_size.unwrap_or(crate::SEND_BUF_SIZE),
            settings.timeouts.recv,
        );
        Self {
            settings,
            adapter,
            client: None,
            sender,
            inbox: Arc::new(NotificationInbox::new()),
            ack: Arc::new(AckSignal::new()),
        }
    }

    pub fn settings(&self) -> &BleSettings {
        &self.settings
    }

    /// Chunk size used by `send`
    pub fn chunk_size(&self) -> usize {
        self.sender.chunk_size()
    }

    /// Scan for devices, delegating to the adapter
    pub async fn search(
        adapter: &dyn GattAdapter,
        timeout: Duration,
    ) -> MediaResult<HashMap<String, DiscoveredDevice>> {
        adapter.discover(timeout).await
    }

    async fn connect(&self, deadline: tokio::time::Instant) -> MediaResult<Arc<dyn GattClient>> {
        timeout_at(deadline, self.adapter.connect(&self.settings.address, self.settings.pairing))
            .await
            .map_err(|_| MediaError::timeout("connect", self.settings.timeouts.connect))?
    }

    /// Check the DLMS service and enable the receive and ready notifications
    async fn handshake(&self, client: &dyn GattClient) -> MediaResult<()> {
        let services = client.services().await?;
        if !services.contains(&DLMS_SERVICE_UUID) {
            return Err(MediaError::ProtocolSetup(format!(
                "{}: DLMS service {} not found",
                self, DLMS_SERVICE_UUID
            )));
        }
        self.subscribe(client).await
    }

    async fn disconnect(&self, client: &dyn GattClient) -> MediaResult<()> {
        match timeout(self.settings.timeouts.close, client.disconnect()).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!(
                    "{}: disconnect not finished within {:?}, link dropped",
                    self,
                    self.settings.timeouts.close
                );
                Ok(())
            }
        }
    }

    async fn subscribe(&self, client: &dyn GattClient) -> MediaResult<()> {
        let inbox = Arc::clone(&self.inbox);
        client
            .subscribe(DLMS_RECV_BUF_UUID, Box::new(move |data: &[u8]| inbox.push(data)))
            .await?;
        let ack = Arc::clone(&self.ack);
        client
            .subscribe(DLMS_READY_UUID, Box::new(move |data: &[u8]| ack.notify(data)))
            .await
    }

    /// Read every readable characteristic of the device
    ///
    /// Uses a separate connection that is closed before returning. A
    /// characteristic whose read fails maps to the error text.
    pub async fn read_characteristics(&self) -> MediaResult<HashMap<String, Vec<u8>>> {
        let deadline = tokio::time::Instant::now() + self.settings.timeouts.connect;
        let client = self.connect(deadline).await?;
        let result = async {
            let mut values = HashMap::new();
            for characteristic in client.characteristics().await? {
                if !characteristic.readable {
                    continue;
                }
                let value = match client.read(characteristic.uuid).await {
                    Ok(value) => value,
                    Err(e) => e.to_string().into_bytes(),
                };
                values.insert(characteristic.description, value);
            }
            Ok::<_, MediaError>(values)
        }
        .await;
        self.disconnect(client.as_ref()).await?;
        result
    }
}

impl fmt::Debug for BleMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BleMedia")
            .field("settings", &self.settings)
            .field("open", &self.is_open())
            .field("chunk_size", &self.sender.chunk_size())
            .finish()
    }
}

impl fmt::Display for BleMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.settings.address)
    }
}

#[async_trait]
impl Media for BleMedia {
    async fn open(&mut self) -> MediaResult<Duration> {
        if self.is_open() {
            return Ok(Duration::ZERO);
        }
        let start = Instant::now();
        let limit = self.settings.timeouts.connect;
        // one budget for connecting and the service handshake
        let deadline = tokio::time::Instant::now() + limit;
        let client = self.connect(deadline).await?;

        let handshake = match timeout_at(deadline, self.handshake(client.as_ref())).await {
            Ok(result) => result,
            Err(_) => Err(MediaError::timeout("connect", limit)),
        };
        if let Err(e) = handshake {
            self.disconnect(client.as_ref()).await?;
            return Err(e);
        }
        self.inbox.clear();

        let chunk_size = self
            .settings
            .chunk_size
            .unwrap_or_else(|| client.max_write_size());
        self.sender = ChunkedSender::new(chunk_size, self.settings.timeouts.recv);
        self.client = Some(client);

        let elapsed = start.elapsed();
        log::debug!("{}: connected in {:?}, chunk size {}", self, elapsed, self.sender.chunk_size());
        Ok(elapsed)
    }

    fn is_open(&self) -> bool {
        self.client.as_ref().is_some_and(|client| client.is_connected())
    }

    async fn close(&mut self) -> MediaResult<Duration> {
        let start = Instant::now();
        let Some(client) = self.client.take() else {
            return Ok(Duration::ZERO);
        };
        if client.is_connected() {
            self.disconnect(client.as_ref()).await?;
        }
        Ok(start.elapsed())
    }

    async fn send(&mut self, data: &[u8]) -> MediaResult<()> {
        let client = match &self.client {
            Some(client) if client.is_connected() => Arc::clone(client),
            _ => return Err(MediaError::not_connected("BLE no connection")),
        };
        self.sender
            .send(client.as_ref(), DLMS_SEND_BUF_UUID, &self.ack, data)
            .await?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut BytesMut) -> MediaResult<bool> {
        if !self.is_open() {
            return Err(MediaError::not_connected("BLE no connection"));
        }
        Ok(self.inbox.receive(buf, self.settings.timeouts.recv).await)
    }
}
