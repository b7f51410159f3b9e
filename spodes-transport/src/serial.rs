//! Serial port media implementation

use crate::stream::FramedStream;
use async_trait::async_trait;
use bytes::BytesMut;
use spodes_core::{Media, MediaError, MediaResult, TimeoutPolicy};
use std::fmt;
use std::time::{Duration, Instant};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilder, SerialStream, StopBits};

/// Default baud rate of optical and RS-485 meter ports
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Serial port settings
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    pub timeouts: TimeoutPolicy,
}

impl SerialSettings {
    /// Create new serial settings, 8N1 without flow control
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            timeouts: TimeoutPolicy::serial(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }
}

impl fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data_bits = match self.data_bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        let stop_bits = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        write!(
            f,
            "{}: {} {}{}{}",
            self.port_name, self.baud_rate, data_bits, parity, stop_bits
        )
    }
}

/// Exclusively owned serial port media
#[derive(Debug)]
pub struct SerialMedia {
    settings: SerialSettings,
    stream: FramedStream<SerialStream>,
}

impl SerialMedia {
    pub fn new(settings: SerialSettings) -> Self {
        let stream = FramedStream::new(settings.timeouts);
        Self { settings, stream }
    }

    /// Create serial media with port name and baud rate
    pub fn new_simple(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self::new(SerialSettings::new(port_name, baud_rate))
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// Port parameters for the driver
    ///
    /// The driver timeout bounds its blocking reads and writes, so it follows
    /// the receive timeout. Opening the port is a single synchronous OS call
    /// that no timeout applies to.
    fn port_builder(&self) -> SerialPortBuilder {
        tokio_serial::new(&self.settings.port_name, self.settings.baud_rate)
            .data_bits(self.settings.data_bits)
            .stop_bits(self.settings.stop_bits)
            .parity(self.settings.parity)
            .flow_control(self.settings.flow_control)
            .timeout(self.settings.timeouts.recv)
    }
}

impl fmt::Display for SerialMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.settings, f)
    }
}

#[async_trait]
impl Media for SerialMedia {
    async fn open(&mut self) -> MediaResult<Duration> {
        if self.stream.is_open() {
            return Ok(Duration::ZERO);
        }
        let start = Instant::now();
        let builder = self.port_builder();
        let stream = SerialStream::open(&builder).map_err(|e| {
            MediaError::Connection(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open serial port {}: {}", self.settings.port_name, e),
            ))
        })?;

        self.stream.attach(stream);
        let elapsed = start.elapsed();
        log::debug!("{}: opened in {:?}", self, elapsed);
        Ok(elapsed)
    }

    fn is_open(&self) -> bool {
        self.stream.is_open()
    }

    async fn close(&mut self) -> MediaResult<Duration> {
        self.stream.close().await
    }

    async fn send(&mut self, data: &[u8]) -> MediaResult<()> {
        self.stream.send(data).await
    }

    async fn receive(&mut self, buf: &mut BytesMut) -> MediaResult<bool> {
        self.stream.receive(buf).await
    }
}
