//! Flow-controlled chunked writes

use crate::ack::AckSignal;
use crate::gatt::GattClient;
use spodes_core::{MediaError, MediaResult};
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

/// Splits a payload into write-sized chunks, one acknowledged chunk at a time
///
/// For every chunk the acknowledgment signal is cleared, the chunk is written
/// with response, and the device must raise the signal before the next chunk
/// goes out. A chunk that is not acknowledged within `ack_timeout` aborts the
/// whole send; already written chunks are not retried.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedSender {
    chunk_size: usize,
    ack_timeout: Duration,
}

impl ChunkedSender {
    /// # Arguments
    ///
    /// * `chunk_size` - Maximum bytes per write, at least 1
    /// * `ack_timeout` - Bound on write plus acknowledgment of one chunk
    pub fn new(chunk_size: usize, ack_timeout: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            ack_timeout,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of writes needed for `len` bytes
    pub fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.chunk_size)
    }

    /// Send `data` to `characteristic`
    ///
    /// # Returns
    ///
    /// Number of chunks written
    pub async fn send(
        &self,
        client: &dyn GattClient,
        characteristic: Uuid,
        ack: &AckSignal,
        data: &[u8],
    ) -> MediaResult<usize> {
        let total = self.chunk_count(data.len());
        for (index, chunk) in data.chunks(self.chunk_size).enumerate() {
            ack.clear();
            let exchange = async {
                client.write(characteristic, chunk, true).await?;
                ack.acknowledged().await
            };
            match timeout(self.ack_timeout, exchange).await {
                Ok(Ok(())) => log::debug!("chunk {}/{} acknowledged", index + 1, total),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    log::warn!("chunk {}/{} not acknowledged within {:?}", index + 1, total, self.ack_timeout);
                    return Err(MediaError::timeout("chunk acknowledgment", self.ack_timeout));
                }
            }
        }
        Ok(total)
    }
}
