//! Stream framing for the Meshtastic TCP (and serial PROTO) client API.
//!
//! Every protobuf is sent as:
//!
//!   `0x94 0xC3 <len_hi> <len_lo> <protobuf bytes>`
//!
//! [`StreamFramer`] is fed arbitrary socket chunks and yields whole frames. Bytes
//! that do not start a valid header (firmware debug text, a partial frame left
//! over from a dropped session) are skipped until the next `0x94 0xC3`.
use bytes::{Buf, BytesMut};

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;
const HEADER_LEN: usize = 4;

/// Largest protobuf the firmware will emit or accept in one frame.
pub const MAX_FRAME_PAYLOAD: usize = 512;

pub struct StreamFramer {
    buf: BytesMut,
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes currently held waiting for a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete frame payload, if any.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            // Realign to a header start.
            match self.buf.iter().position(|&b| b == START1) {
                Some(0) => {}
                Some(pos) => self.buf.advance(pos),
                None => {
                    self.buf.clear();
                    return None;
                }
            }
            if self.buf.len() < 2 {
                return None;
            }
            if self.buf[1] != START2 {
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let declared = ((self.buf[2] as usize) << 8) | (self.buf[3] as usize);
            if declared == 0 || declared > MAX_FRAME_PAYLOAD {
                // Corrupt length; drop the start byte and resync.
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN + declared {
                return None;
            }
            self.buf.advance(HEADER_LEN);
            return Some(self.buf.split_to(declared).to_vec());
        }
    }
}

/// Prefix a protobuf payload with the stream header.
pub fn encode_frame(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.is_empty() || payload.len() > MAX_FRAME_PAYLOAD {
        return None;
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(START1);
    out.push(START2);
    out.push(((payload.len() >> 8) & 0xFF) as u8);
    out.push((payload.len() & 0xFF) as u8);
    out.extend_from_slice(payload);
    Some(out)
}
