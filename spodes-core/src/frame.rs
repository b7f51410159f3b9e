//! Frame boundary detection
//!
//! Frames are delimited by the HDLC flag byte. This layer never looks inside a
//! frame; it only decides when enough bytes have arrived for one.

use bytes::BytesMut;

/// HDLC flag byte, opening and closing delimiter of every frame
pub const FLAG: u8 = 0x7E;

/// Check whether `buf` ends on a closing flag
///
/// A buffer holding a single flag byte is an opening delimiter only and is not
/// complete. Two consecutive flags form a (degenerate) complete frame.
pub fn is_frame_complete(buf: &[u8]) -> bool {
    buf.len() > 1 && buf.last() == Some(&FLAG)
}

/// Accumulates incrementally received bytes into a caller's buffer
///
/// The completion check runs after every push, since transports deliver
/// frames split across arbitrary reads.
#[derive(Debug)]
pub struct FrameAssembler<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> FrameAssembler<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf }
    }

    /// Append a chunk and report whether the buffer now holds a complete frame
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        self.buf.extend_from_slice(chunk);
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        is_frame_complete(&self.buf[..])
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
