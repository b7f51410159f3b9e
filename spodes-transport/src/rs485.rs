//! RS-485 media: logical handles multiplexed over a shared serial line

use crate::serial::SerialSettings;
use crate::shared::{LineRelease, SharedLine, SharedLineRegistry};
use crate::transaction::Transaction;
use async_trait::async_trait;
use bytes::BytesMut;
use spodes_core::{Media, MediaError, MediaResult, TimeoutPolicy};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One logical caller on a shared RS-485 line
///
/// `open` and `close` attach to and detach from the line; only the first
/// attach and the last detach touch the physical port. `send` enters an
/// exclusive transaction that lasts until [`Media::end_transaction`], `close`,
/// or an I/O error, so the matching `receive` calls see only the answer to
/// this handle's request.
///
/// Dropping the handle ends its transaction but does not detach it; call
/// `close` to give up the connection.
pub struct Rs485Media {
    line: Arc<SharedLine>,
    timeouts: TimeoutPolicy,
    attached: bool,
    transaction: Transaction,
}

impl Rs485Media {
    /// Handle on the registry's line for `settings.port_name`
    pub fn new(registry: &SharedLineRegistry, settings: SerialSettings) -> Self {
        let line = registry.line(&settings);
        Self::with_line(line, settings.timeouts)
    }

    pub fn with_line(line: Arc<SharedLine>, timeouts: TimeoutPolicy) -> Self {
        Self {
            line,
            timeouts,
            attached: false,
            transaction: Transaction::default(),
        }
    }

    pub fn line(&self) -> &Arc<SharedLine> {
        &self.line
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_active()
    }

    /// Detach from the line, reporting whether it was physically closed
    ///
    /// Any transaction held by this handle is released first.
    pub async fn release(&mut self) -> MediaResult<LineRelease> {
        self.end_transaction();
        if !self.attached {
            return Ok(LineRelease::Closed(Duration::ZERO));
        }
        self.attached = false;
        self.line.detach().await
    }
}

impl fmt::Debug for Rs485Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rs485Media")
            .field("port", &self.line.port())
            .field("attached", &self.attached)
            .field("in_transaction", &self.transaction.is_active())
            .finish()
    }
}

impl fmt::Display for Rs485Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RS485 {}", self.line.port())
    }
}

#[async_trait]
impl Media for Rs485Media {
    async fn open(&mut self) -> MediaResult<Duration> {
        if self.attached {
            return self.line.reopen().await;
        }
        let elapsed = self.line.attach().await?;
        self.attached = true;
        Ok(elapsed)
    }

    fn is_open(&self) -> bool {
        self.attached && self.line.is_open()
    }

    async fn close(&mut self) -> MediaResult<Duration> {
        match self.release().await? {
            LineRelease::Closed(elapsed) => Ok(elapsed),
            LineRelease::StillInUse { remaining } => {
                log::info!("{}: still in use by {} other handle(s)", self, remaining);
                Ok(Duration::ZERO)
            }
        }
    }

    async fn send(&mut self, data: &[u8]) -> MediaResult<()> {
        if !self.attached {
            return Err(MediaError::not_connected(format!("{} is not open", self)));
        }
        self.transaction
            .begin(self.line.transaction_lock(), self.timeouts.line)
            .await?;
        let result = self.line.send(data).await;
        if result.is_err() {
            self.end_transaction();
        }
        result
    }

    async fn receive(&mut self, buf: &mut BytesMut) -> MediaResult<bool> {
        if !self.transaction.is_active() {
            return Err(MediaError::Concurrency(format!(
                "{}: receive called outside of a transaction",
                self
            )));
        }
        let result = self.line.receive(buf).await;
        if result.is_err() {
            self.end_transaction();
        }
        result
    }

    fn end_transaction(&mut self) {
        if self.transaction.end() {
            log::debug!("{}: transaction ended", self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spodes_core::{MockMedia, is_frame_complete};
    use std::collections::VecDeque;
    use std::sync::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FRAME_A: [u8; 9] = [0x7E, 0xA0, 0x07, 0x03, 0x21, 0x93, 0x0F, 0x01, 0x7E];
    const FRAME_B: [u8; 9] = [0x7E, 0xA0, 0x07, 0x05, 0x21, 0x93, 0x0F, 0x01, 0x7E];

    #[derive(Default)]
    struct Counters {
        opens: AtomicUsize,
        closes: AtomicUsize,
    }

    /// Bus where every written byte is read back
    struct LoopbackLine {
        open: bool,
        wire: Arc<SyncMutex<VecDeque<u8>>>,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl Media for LoopbackLine {
        async fn open(&mut self) -> MediaResult<Duration> {
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            self.open = true;
            Ok(Duration::ZERO)
        }

        fn is_open(&self) -> bool {
            self.open
        }

        async fn close(&mut self) -> MediaResult<Duration> {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            self.open = false;
            Ok(Duration::ZERO)
        }

        async fn send(&mut self, data: &[u8]) -> MediaResult<()> {
            self.wire.lock().unwrap().extend(data.iter().copied());
            Ok(())
        }

        async fn receive(&mut self, buf: &mut BytesMut) -> MediaResult<bool> {
            let bytes: Vec<u8> = self.wire.lock().unwrap().drain(..).collect();
            buf.extend_from_slice(&bytes);
            Ok(is_frame_complete(buf))
        }
    }

    struct Bus {
        line: Arc<SharedLine>,
        wire: Arc<SyncMutex<VecDeque<u8>>>,
        counters: Arc<Counters>,
    }

    fn loopback_bus(registry: &SharedLineRegistry, port: &str) -> Bus {
        let wire = Arc::new(SyncMutex::new(VecDeque::new()));
        let counters = Arc::new(Counters::default());
        let line = registry.line_with(port, {
            let wire = Arc::clone(&wire);
            let counters = Arc::clone(&counters);
            move || {
                Box::new(LoopbackLine {
                    open: false,
                    wire,
                    counters,
                })
            }
        });
        Bus { line, wire, counters }
    }

    fn policy() -> TimeoutPolicy {
        TimeoutPolicy::serial().with_line(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_two_handles_share_com5() {
        let registry = SharedLineRegistry::new();
        let bus = loopback_bus(&registry, "COM5");
        let mut first = Rs485Media::with_line(Arc::clone(&bus.line), policy());
        let mut second = Rs485Media::with_line(Arc::clone(&bus.line), policy());
        assert!(!first.is_open());

        first.open().await.unwrap();
        second.open().await.unwrap();
        assert_eq!(bus.counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(registry.connection_count("COM5").await, 2);

        first.close().await.unwrap();
        assert!(!first.is_open());
        assert!(second.is_open());
        assert_eq!(registry.connection_count("COM5").await, 1);
        assert_eq!(bus.counters.closes.load(Ordering::SeqCst), 0);

        second.close().await.unwrap();
        assert!(!second.is_open());
        assert!(!bus.line.is_open());
        assert_eq!(bus.counters.closes.load(Ordering::SeqCst), 1);
        assert_eq!(registry.connection_count("COM5").await, 0);
    }

    #[tokio::test]
    async fn test_open_n_times_on_one_line() {
        let mut mock = MockMedia::new();
        mock.expect_open().times(1).returning(|| Ok(Duration::ZERO));
        mock.expect_close().times(1).returning(|| Ok(Duration::ZERO));
        mock.expect_is_open().return_const(true);
        let registry = SharedLineRegistry::new();
        let line = registry.line_with("COM3", move || Box::new(mock));

        let mut handles: Vec<Rs485Media> = (0..4)
            .map(|_| Rs485Media::with_line(Arc::clone(&line), policy()))
            .collect();
        for handle in handles.iter_mut() {
            handle.open().await.unwrap();
        }
        assert_eq!(line.connection_count().await, 4);

        for handle in handles.iter_mut() {
            handle.close().await.unwrap();
        }
        assert_eq!(line.connection_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_opens_and_closes_keep_count() {
        let registry = SharedLineRegistry::new();
        let bus = loopback_bus(&registry, "COM5");

        let opening: Vec<_> = (0..32)
            .map(|_| {
                let mut handle = Rs485Media::with_line(Arc::clone(&bus.line), policy());
                tokio::spawn(async move {
                    handle.open().await.unwrap();
                    handle
                })
            })
            .collect();
        let mut handles = Vec::new();
        for task in opening {
            handles.push(task.await.unwrap());
        }
        assert_eq!(bus.counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(registry.connection_count("COM5").await, 32);
        assert!(handles.iter().all(|handle| handle.is_open()));

        let closing: Vec<_> = handles
            .into_iter()
            .map(|mut handle| tokio::spawn(async move { handle.close().await.unwrap() }))
            .collect();
        for task in closing {
            task.await.unwrap();
        }
        assert_eq!(bus.counters.closes.load(Ordering::SeqCst), 1);
        assert_eq!(registry.connection_count("COM5").await, 0);
        assert!(!bus.line.is_open());
    }

    #[tokio::test]
    async fn test_open_and_close_while_other_handle_in_transaction() {
        let registry = SharedLineRegistry::new();
        let bus = loopback_bus(&registry, "COM5");
        let mut a = Rs485Media::with_line(Arc::clone(&bus.line), policy());
        let mut c = Rs485Media::with_line(Arc::clone(&bus.line), policy());
        a.open().await.unwrap();
        a.send(&FRAME_A).await.unwrap();
        assert!(bus.line.transaction_lock().is_held());

        // admission never waits for the transaction lock
        let admission = tokio::time::timeout(Duration::from_millis(200), async {
            c.open().await.unwrap();
            assert_eq!(bus.line.connection_count().await, 2);
            c.close().await.unwrap();
        })
        .await;
        assert!(admission.is_ok());
        assert_eq!(bus.line.connection_count().await, 1);
        assert_eq!(bus.counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(bus.counters.closes.load(Ordering::SeqCst), 0);

        assert!(a.in_transaction());
        let mut buf = BytesMut::new();
        assert!(a.receive(&mut buf).await.unwrap());
        assert_eq!(&buf[..], &FRAME_A[..]);
        a.end_transaction();
        assert!(!bus.line.transaction_lock().is_held());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_per_handle() {
        let registry = SharedLineRegistry::new();
        let bus = loopback_bus(&registry, "COM5");
        let mut first = Rs485Media::with_line(Arc::clone(&bus.line), policy());
        let mut second = Rs485Media::with_line(Arc::clone(&bus.line), policy());
        let mut never_opened = Rs485Media::with_line(Arc::clone(&bus.line), policy());

        first.open().await.unwrap();
        second.open().await.unwrap();

        first.close().await.unwrap();
        first.close().await.unwrap();
        never_opened.close().await.unwrap();
        assert_eq!(bus.line.connection_count().await, 1);
        assert!(second.is_open());

        assert_eq!(second.release().await.unwrap(), LineRelease::Closed(Duration::ZERO));
        assert_eq!(second.release().await.unwrap(), LineRelease::Closed(Duration::ZERO));
        assert_eq!(bus.counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_receive_requires_transaction() {
        let registry = SharedLineRegistry::new();
        let bus = loopback_bus(&registry, "COM5");
        let mut handle = Rs485Media::with_line(Arc::clone(&bus.line), policy());
        handle.open().await.unwrap();

        let mut buf = BytesMut::new();
        let err = handle.receive(&mut buf).await.unwrap_err();
        assert!(matches!(err, MediaError::Concurrency(_)));

        handle.send(&FRAME_A).await.unwrap();
        assert!(handle.in_transaction());
        assert!(handle.receive(&mut buf).await.unwrap());
        assert_eq!(&buf[..], &FRAME_A[..]);

        handle.end_transaction();
        handle.end_transaction();
        assert!(!handle.in_transaction());
        assert!(handle.receive(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn test_send_requires_open() {
        let registry = SharedLineRegistry::new();
        let bus = loopback_bus(&registry, "COM5");
        let mut handle = Rs485Media::with_line(Arc::clone(&bus.line), policy());
        assert!(matches!(handle.send(&FRAME_A).await, Err(MediaError::Connection(_))));
        assert!(!handle.in_transaction());
    }

    #[tokio::test]
    async fn test_busy_line_times_out_without_writing() {
        let registry = SharedLineRegistry::new();
        let bus = loopback_bus(&registry, "COM5");
        let mut a = Rs485Media::with_line(Arc::clone(&bus.line), policy());
        let mut b = Rs485Media::with_line(Arc::clone(&bus.line), policy());
        a.open().await.unwrap();
        b.open().await.unwrap();

        a.send(&FRAME_A).await.unwrap();
        let err = b.send(&FRAME_B).await.unwrap_err();
        assert!(matches!(err, MediaError::Concurrency(_)));
        assert!(!b.in_transaction());
        assert_eq!(bus.wire.lock().unwrap().len(), FRAME_A.len());
    }

    #[tokio::test]
    async fn test_close_releases_held_transaction() {
        let registry = SharedLineRegistry::new();
        let bus = loopback_bus(&registry, "COM5");
        let mut a = Rs485Media::with_line(Arc::clone(&bus.line), policy());
        let mut b = Rs485Media::with_line(Arc::clone(&bus.line), policy());
        a.open().await.unwrap();
        b.open().await.unwrap();

        a.send(&FRAME_A).await.unwrap();
        a.close().await.unwrap();
        assert!(!bus.line.transaction_lock().is_held());

        b.send(&FRAME_B).await.unwrap();
        assert!(b.in_transaction());
    }

    #[tokio::test]
    async fn test_exchanges_do_not_interleave() {
        let registry = SharedLineRegistry::new();
        let bus = loopback_bus(&registry, "COM5");
        let slow = TimeoutPolicy::serial().with_line(Duration::from_secs(2));
        let mut a = Rs485Media::with_line(Arc::clone(&bus.line), slow);
        let mut b = Rs485Media::with_line(Arc::clone(&bus.line), slow);
        a.open().await.unwrap();
        b.open().await.unwrap();

        a.send(&FRAME_A).await.unwrap();

        let b_task = tokio::spawn(async move {
            b.send(&FRAME_B).await.unwrap();
            let mut buf = BytesMut::new();
            let complete = b.receive(&mut buf).await.unwrap();
            b.end_transaction();
            (complete, buf)
        });

        // give B every chance to write while A still owns the line
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut buf = BytesMut::new();
        assert!(a.receive(&mut buf).await.unwrap());
        assert_eq!(&buf[..], &FRAME_A[..]);
        a.end_transaction();

        let (complete, b_buf) = b_task.await.unwrap();
        assert!(complete);
        assert_eq!(&b_buf[..], &FRAME_B[..]);
    }
}
