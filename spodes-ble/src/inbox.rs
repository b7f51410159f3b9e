//! Buffer for incoming characteristic notifications

use bytes::BytesMut;
use spodes_core::{FLAG, is_frame_complete};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};

/// Collects notification chunks until `receive` picks them up
///
/// [`push`](Self::push) runs inside the GATT notification callback: it only
/// takes the buffer lock for the append and raises the frame signal when the
/// chunk carries a flag byte.
#[derive(Debug, Default)]
pub struct NotificationInbox {
    buf: Mutex<BytesMut>,
    frame: Notify,
}

impl NotificationInbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BytesMut> {
        self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, chunk: &[u8]) {
        self.lock().extend_from_slice(chunk);
        if chunk.contains(&FLAG) {
            self.frame.notify_one();
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Move the buffered bytes to `out` if they form a complete frame
    fn take_frame(&self, out: &mut BytesMut) -> bool {
        let mut buf = self.lock();
        if is_frame_complete(&buf) {
            out.extend_from_slice(&buf);
            buf.clear();
            true
        } else {
            false
        }
    }

    fn take_all(&self, out: &mut BytesMut) {
        let mut buf = self.lock();
        out.extend_from_slice(&buf);
        buf.clear();
    }

    /// Wait up to `limit` for a complete frame and move it into `out`
    ///
    /// # Returns
    ///
    /// `true` for a complete frame; `false` on timeout, in which case the
    /// partial bytes are moved into `out` as well.
    pub async fn receive(&self, out: &mut BytesMut, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if self.take_frame(out) {
                return true;
            }
            if timeout_at(deadline, self.frame.notified()).await.is_err() {
                self.take_all(out);
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_frame_from_several_notifications() {
        let inbox = Arc::new(NotificationInbox::new());
        let producer = Arc::clone(&inbox);
        tokio::spawn(async move {
            for chunk in [&[0x7E, 0xA0][..], &[0x07, 0x03, 0x21], &[0x93, 0x0F, 0x01, 0x7E]] {
                tokio::time::sleep(Duration::from_millis(5)).await;
                producer.push(chunk);
            }
        });

        let mut out = BytesMut::new();
        assert!(inbox.receive(&mut out, Duration::from_secs(1)).await);
        assert_eq!(&out[..], &[0x7E, 0xA0, 0x07, 0x03, 0x21, 0x93, 0x0F, 0x01, 0x7E]);
        assert!(inbox.is_empty());
    }

    #[tokio::test]
    async fn test_opening_flag_alone_does_not_complete() {
        let inbox = NotificationInbox::new();
        inbox.push(&[0x7E]);

        let mut out = BytesMut::new();
        assert!(!inbox.receive(&mut out, Duration::from_millis(50)).await);
        assert_eq!(&out[..], &[0x7E]);
        assert!(inbox.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_returns_partial_bytes() {
        let inbox = NotificationInbox::new();
        inbox.push(&[0xA0, 0x07]);

        let start = std::time::Instant::now();
        let mut out = BytesMut::new();
        assert!(!inbox.receive(&mut out, Duration::from_millis(100)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(&out[..], &[0xA0, 0x07]);
    }

    #[tokio::test]
    async fn test_frame_already_buffered() {
        let inbox = NotificationInbox::new();
        inbox.push(&[0x7E, 0x7E]);
        let mut out = BytesMut::new();
        assert!(inbox.receive(&mut out, Duration::from_millis(10)).await);
        assert_eq!(inbox.len(), 0);
    }
}
