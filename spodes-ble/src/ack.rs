//! Per-chunk acknowledgment signal

use crate::READY_OK;
use spodes_core::{MediaError, MediaResult};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AckState {
    Pending,
    Ready,
    Rejected(Vec<u8>),
}

/// Signal raised by the "ready" notification after each written chunk
///
/// The notification side ([`AckSignal::notify`]) never blocks, so it can be
/// called straight from a GATT callback.
#[derive(Debug)]
pub struct AckSignal {
    state: watch::Sender<AckState>,
}

impl AckSignal {
    pub fn new() -> Self {
        let (state, _) = watch::channel(AckState::Pending);
        Self { state }
    }

    /// Forget any previous acknowledgment before writing the next chunk
    pub fn clear(&self) {
        self.state.send_replace(AckState::Pending);
    }

    /// Record an acknowledgment value received from the device
    ///
    /// Anything other than [`READY_OK`] is a rejection and fails the pending
    /// wait.
    pub fn notify(&self, value: &[u8]) {
        if value == READY_OK {
            self.state.send_replace(AckState::Ready);
        } else {
            log::error!("unexpected acknowledgment {:02X?}, expected {:02X?}", value, READY_OK);
            self.state.send_replace(AckState::Rejected(value.to_vec()));
        }
    }

    pub fn is_pending(&self) -> bool {
        *self.state.borrow() == AckState::Pending
    }

    /// Wait until the device acknowledged or rejected the last chunk
    ///
    /// Unbounded; callers wrap it in a timeout.
    pub async fn acknowledged(&self) -> MediaResult<()> {
        let mut receiver = self.state.subscribe();
        let state = match receiver.wait_for(|state| *state != AckState::Pending).await {
            Ok(state) => state.clone(),
            Err(_) => return Err(MediaError::Protocol("acknowledgment channel closed".to_string())),
        };
        match state {
            AckState::Ready => Ok(()),
            AckState::Rejected(value) => Err(MediaError::Protocol(format!(
                "got acknowledgment {:02X?}, expected {:02X?}",
                value, READY_OK
            ))),
            AckState::Pending => Err(MediaError::Protocol("acknowledgment still pending".to_string())),
        }
    }
}

impl Default for AckSignal {
    fn default() -> Self {
        Self::new()
    }
}
