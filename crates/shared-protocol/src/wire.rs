//! Frame header codec
//!
//! Every encrypted message travels as
//! `len (u32, big-endian) || nonce (24) || ciphertext (plaintext + 16)`,
//! where `len` counts the nonce and ciphertext bytes. The prefix lets a
//! reader consume exactly one frame from a stream that has no message
//! boundaries of its own.

use bytes::BufMut;

use crate::{FRAME_OVERHEAD, ProtocolError, ProtocolResult};

/// Size of the length prefix preceding every frame
pub const FRAME_HEADER_SIZE: usize = 4;

/// Length prefix of a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    body_len: u32,
}

impl FrameHeader {
    /// Header for a frame carrying `plaintext_len` bytes of plaintext
    pub fn for_plaintext(plaintext_len: usize, max_message_len: usize) -> ProtocolResult<Self> {
        if plaintext_len > max_message_len {
            return Err(ProtocolError::FrameTooLarge {
                size: plaintext_len,
                max: max_message_len,
            });
        }

        let body_len = plaintext_len + FRAME_OVERHEAD;
        let body_len = u32::try_from(body_len).map_err(|_| ProtocolError::FrameTooLarge {
            size: plaintext_len,
            max: u32::MAX as usize - FRAME_OVERHEAD,
        })?;

        Ok(Self { body_len })
    }

    /// Decode and validate a received length prefix
    pub fn decode(bytes: [u8; FRAME_HEADER_SIZE], max_message_len: usize) -> ProtocolResult<Self> {
        let body_len = u32::from_be_bytes(bytes);
        let size = body_len as usize;

        if size < FRAME_OVERHEAD {
            return Err(ProtocolError::FrameTooShort {
                size,
                min: FRAME_OVERHEAD,
            });
        }

        if size - FRAME_OVERHEAD > max_message_len {
            return Err(ProtocolError::FrameTooLarge {
                size: size - FRAME_OVERHEAD,
                max: max_message_len,
            });
        }

        Ok(Self { body_len })
    }

    /// Append the encoded prefix to `buf`
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.body_len);
    }

    /// Nonce plus ciphertext length
    pub fn body_len(&self) -> usize {
        self.body_len as usize
    }

    /// Ciphertext length (plaintext plus tag)
    pub fn ciphertext_len(&self) -> usize {
        self.body_len() - crate::NONCE_SIZE
    }

    /// Plaintext length once the tag is stripped
    pub fn plaintext_len(&self) -> usize {
        self.body_len() - FRAME_OVERHEAD
    }

    /// Total bytes on the wire including the prefix
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.body_len()
    }
}
