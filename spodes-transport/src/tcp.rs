//! TCP media implementation

use crate::stream::FramedStream;
use async_trait::async_trait;
use bytes::BytesMut;
use spodes_core::{Media, MediaError, MediaResult, TimeoutPolicy};
use std::fmt;
use std::io;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout_at};

/// Default DLMS/COSEM TCP port
pub const DEFAULT_PORT: u16 = 4059;

/// Pause between connect attempts refused by the OS attempt limit
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// OS error reported when too many connection attempts are outstanding
#[cfg(windows)]
const CONNECT_LIMIT_OS_ERROR: i32 = 1238; // ERROR_CONNECTION_COUNT_LIMIT

/// Whether a connect failure is worth another attempt
///
/// Only the OS connection-attempt limit is transient; every other failure is
/// final. Unix reports it as `EAGAIN`, whose number differs between targets,
/// so it is matched by kind there.
pub fn is_connect_limit_error(error: &io::Error) -> bool {
    #[cfg(windows)]
    {
        error.raw_os_error() == Some(CONNECT_LIMIT_OS_ERROR)
    }
    #[cfg(not(windows))]
    {
        error.kind() == io::ErrorKind::WouldBlock
    }
}

/// TCP media settings
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub host: String,
    pub port: u16,
    pub timeouts: TimeoutPolicy,
}

impl NetworkSettings {
    /// Create new TCP settings with default timeouts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeouts: TimeoutPolicy::network(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

/// TCP media
#[derive(Debug)]
pub struct NetworkMedia {
    settings: NetworkSettings,
    stream: FramedStream<TcpStream>,
}

impl NetworkMedia {
    pub fn new(settings: NetworkSettings) -> Self {
        let stream = FramedStream::new(settings.timeouts);
        Self { settings, stream }
    }

    /// Create TCP media from host and port with default timeouts
    pub fn from_address(host: &str, port: u16) -> Self {
        Self::new(NetworkSettings::new(host, port))
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    async fn connect(&self) -> MediaResult<TcpStream> {
        let budget = self.settings.timeouts.connect;
        let deadline = tokio::time::Instant::now() + budget;
        let address = (self.settings.host.as_str(), self.settings.port);

        loop {
            match timeout_at(deadline, TcpStream::connect(address)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) if is_connect_limit_error(&e) => {
                    log::warn!("{}: connection attempt limit reached, retrying", self);
                    if tokio::time::Instant::now() + CONNECT_RETRY_DELAY >= deadline {
                        return Err(MediaError::timeout("connect", budget));
                    }
                    sleep(CONNECT_RETRY_DELAY).await;
                }
                Ok(Err(e)) => return Err(MediaError::Connection(e)),
                Err(_) => return Err(MediaError::timeout("connect", budget)),
            }
        }
    }
}

impl fmt::Display for NetworkMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.settings.host, self.settings.port)
    }
}

#[async_trait]
impl Media for NetworkMedia {
    async fn open(&mut self) -> MediaResult<Duration> {
        if self.stream.is_open() {
            return Ok(Duration::ZERO);
        }
        let start = Instant::now();
        let stream = self.connect().await?;
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("{}: TCP_NODELAY not applied: {}", self, e);
        }
        self.stream.attach(stream);
        let elapsed = start.elapsed();
        log::debug!("{}: connected in {:?}", self, elapsed);
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
