//! Framed byte stream shared by the TCP and serial backends

use bytes::BytesMut;
use spodes_core::{FrameAssembler, MediaError, MediaResult, TimeoutPolicy};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Size of a single read from the underlying stream
const READ_CHUNK_SIZE: usize = 256;

enum ReadOutcome {
    Frame,
    Idle,
    Eof,
    Failed(std::io::Error),
}

/// A byte stream with bounded send, frame-aware receive and abortable close
///
/// Backends own one of these and only differ in how the stream is obtained.
/// The stream being present is what makes the media "open": a read error or
/// end of stream drops it.
pub struct FramedStream<S> {
    stream: Option<S>,
    timeouts: TimeoutPolicy,
}

impl<S> fmt::Debug for FramedStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedStream")
            .field("open", &self.stream.is_some())
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(timeouts: TimeoutPolicy) -> Self {
        Self {
            stream: None,
            timeouts,
        }
    }

    /// Take ownership of a freshly connected stream
    pub fn attach(&mut self, stream: S) {
        self.stream = Some(stream);
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn timeouts(&self) -> &TimeoutPolicy {
        &self.timeouts
    }

    /// Write all of `data` and flush it within the drain timeout
    pub async fn send(&mut self, data: &[u8]) -> MediaResult<()> {
        let drain = self.timeouts.drain;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| MediaError::not_connected("stream not connected"))?;

        let result = timeout(drain, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.stream = None;
                Err(MediaError::Connection(e))
            }
            Err(_) => Err(MediaError::timeout("drain", drain)),
        }
    }

    /// Read until the buffer ends on a closing flag or the stream goes quiet
    ///
    /// Each read is bounded by the receive timeout. A quiet stream is not an
    /// error: the call returns `false` and keeps what arrived. End of stream
    /// closes the media and is reported as a connection error.
    pub async fn receive(&mut self, buf: &mut BytesMut) -> MediaResult<bool> {
        let recv = self.timeouts.recv;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| MediaError::not_connected("stream not connected"))?;

        let mut assembler = FrameAssembler::new(buf);
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let outcome = loop {
            match timeout(recv, stream.read(&mut chunk)).await {
                Err(_) => break ReadOutcome::Idle,
                Ok(Ok(0)) => break ReadOutcome::Eof,
                Ok(Ok(n)) => {
                    if assembler.push(&chunk[..n]) {
                        break ReadOutcome::Frame;
                    }
                }
                Ok(Err(e)) => break ReadOutcome::Failed(e),
            }
        };

        match outcome {
            ReadOutcome::Frame => Ok(true),
            ReadOutcome::Idle => {
                log::debug!("no data within {:?}, {} bytes pending", recv, buf.len());
                Ok(false)
            }
            ReadOutcome::Eof => {
                self.stream = None;
                Err(MediaError::closed_by_peer("stream closed by peer"))
            }
            ReadOutcome::Failed(e) => {
                self.stream = None;
                Err(MediaError::Connection(e))
            }
        }
    }

    /// Shut the stream down, aborting it if the close timeout runs out
    ///
    /// # Returns
    ///
    /// Time spent closing; zero when the stream was already closed
    pub async fn close(&mut self) -> MediaResult<Duration> {
        let start = Instant::now();
        let Some(mut stream) = self.stream.take() else {
            return Ok(Duration::ZERO);
        };

        match timeout(self.timeouts.close, stream.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::debug!("shutdown failed, dropping connection: {}", e),
            Err(_) => log::warn!(
                "graceful shutdown not finished within {:?}, connection aborted",
                self.timeouts.close
            ),
        }
        drop(stream);
        Ok(start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadBuf};
    use tokio_test::io::Builder;

    const FRAME: [u8; 9] = [0x7E, 0xA0, 0x07, 0x03, 0x21, 0x93, 0x0F, 0x01, 0x7E];

    fn policy(recv_ms: u64) -> TimeoutPolicy {
        TimeoutPolicy::network()
            .with_recv(Duration::from_millis(recv_ms))
            .with_close(Duration::from_millis(100))
            .with_drain(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let mock = Builder::new()
            .read(&FRAME[..3])
            .read(&FRAME[3..5])
            .read(&FRAME[5..])
            .build();
        let mut framed = FramedStream::new(policy(500));
        framed.attach(mock);

        let mut buf = BytesMut::new();
        assert!(framed.receive(&mut buf).await.unwrap());
        assert_eq!(&buf[..], &FRAME[..]);
        assert!(framed.is_open());
    }

    #[tokio::test]
    async fn test_leading_flag_alone_keeps_reading() {
        let mock = Builder::new().read(&[0x7E]).read(&[0x7E]).build();
        let mut framed = FramedStream::new(policy(500));
        framed.attach(mock);

        let mut buf = BytesMut::new();
        assert!(framed.receive(&mut buf).await.unwrap());
        assert_eq!(&buf[..], &[0x7E, 0x7E]);
    }

    #[tokio::test]
    async fn test_quiet_peer_returns_partial_bytes() {
        let (client, mut peer) = tokio::io::duplex(64);
        peer.write_all(&[0x7E, 0xA0, 0x07]).await.unwrap();

        let mut framed = FramedStream::new(policy(100));
        framed.attach(client);

        let start = Instant::now();
        let mut buf = BytesMut::new();
        assert!(!framed.receive(&mut buf).await.unwrap());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(&buf[..], &[0x7E, 0xA0, 0x07]);
        assert!(framed.is_open());
    }

    #[tokio::test]
    async fn test_end_of_stream_closes() {
        let mock = Builder::new().read(&[0x7E, 0xA0]).build();
        let mut framed = FramedStream::new(policy(500));
        framed.attach(mock);

        let mut buf = BytesMut::new();
        let err = framed.receive(&mut buf).await.unwrap_err();
        assert!(matches!(err, MediaError::Connection(_)));
        assert_eq!(&buf[..], &[0x7E, 0xA0]);
        assert!(!framed.is_open());
    }

    #[tokio::test]
    async fn test_send_and_receive_in_order() {
        let mock = Builder::new().write(&FRAME).read(&FRAME).build();
        let mut framed = FramedStream::new(policy(500));
        framed.attach(mock);

        framed.send(&FRAME).await.unwrap();
        let mut buf = BytesMut::new();
        assert!(framed.receive(&mut buf).await.unwrap());
        assert_eq!(&buf[..], &FRAME[..]);
    }

    #[tokio::test]
    async fn test_send_without_stream_fails() {
        let mut framed: FramedStream<DuplexStream> = FramedStream::new(policy(100));
        assert!(matches!(framed.send(&FRAME).await, Err(MediaError::Connection(_))));
        let mut buf = BytesMut::new();
        assert!(framed.receive(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn test_stalled_peer_hits_drain_timeout() {
        let (client, _peer) = tokio::io::duplex(4);
        let mut framed = FramedStream::new(policy(100));
        framed.attach(client);

        let err = framed.send(&[0u8; 64]).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, _peer) = tokio::io::duplex(64);
        let mut framed = FramedStream::new(policy(100));
        framed.attach(client);

        framed.close().await.unwrap();
        assert!(!framed.is_open());
        assert_eq!(framed.close().await.unwrap(), Duration::ZERO);
        assert_eq!(framed.close().await.unwrap(), Duration::ZERO);
    }

    /// Stream whose shutdown never completes
    struct StalledShutdown;

    impl AsyncRead for StalledShutdown {
        fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for StalledShutdown {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_close_timeout_aborts() {
        let mut framed = FramedStream::new(policy(100));
        framed.attach(StalledShutdown);

        let elapsed = framed.close().await.unwrap();
        assert!(elapsed >= Duration::from_millis(90));
        assert!(!framed.is_open());
    }
}
