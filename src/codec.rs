//! Framing between a byte stream and message payloads.
//!
//! Codecs are buffer-oriented: the connection accumulates whatever the socket
//! delivers and asks the codec to cut frames from the front of that buffer.
//! This lets the same codec serve blocking reads and selector-driven reads.

use crate::error::Error;
use std::fmt::Debug;

const CRLF: &[u8] = b"\r\n";
const LENGTH_HEADER_SIZE: usize = 4;

/// Converts between framed bytes on the wire and message payloads.
pub trait Codec: Send + Sync + Debug {
    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns the payload and the number of bytes consumed, or `None` when
    /// `buf` doesn't hold a complete frame yet.
    fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, Error>;

    /// Appends the framed form of `payload` to `out`.
    fn encode(&self, payload: &[u8], out: &mut Vec<u8>) -> Result<(), Error>;
}

// ============================================================================
// CrLfCodec
// ============================================================================

/// Frames payloads with a trailing `\r\n`.
#[derive(Debug, Clone)]
pub struct CrLfCodec {
    max_message_size: usize,
}

impl CrLfCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Codec for CrLfCodec {
    fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, Error> {
        match buf.windows(CRLF.len()).position(|w| w == CRLF) {
            Some(end) => {
                if end > self.max_message_size {
                    return Err(Error::MessageTooLarge {
                        size: end,
                        max: self.max_message_size,
                    });
                }
                Ok(Some((buf[..end].to_vec(), end + CRLF.len())))
            }
            // Without a terminator in sight the frame is already too long
            None if buf.len() > self.max_message_size + 1 => Err(Error::MessageTooLarge {
                size: buf.len(),
                max: self.max_message_size,
            }),
            None => Ok(None),
        }
    }

    fn encode(&self, payload: &[u8], out: &mut Vec<u8>) -> Result<(), Error> {
        if payload.windows(CRLF.len()).any(|w| w == CRLF) {
            return Err(Error::MalformedFrame(
                "payload contains a CRLF terminator".to_string(),
            ));
        }
        out.reserve(payload.len() + CRLF.len());
        out.extend_from_slice(payload);
        out.extend_from_slice(CRLF);
        Ok(())
    }
}

// ============================================================================
// LengthHeaderCodec
// ============================================================================

/// Prefixes payloads with a 4-byte big-endian length.
#[derive(Debug, Clone)]
pub struct LengthHeaderCodec {
    max_message_size: usize,
}

impl LengthHeaderCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Codec for LengthHeaderCodec {
    fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, Error> {
        let Some(header) = buf.get(..LENGTH_HEADER_SIZE) else {
            return Ok(None);
        };
        let mut len_bytes = [0u8; LENGTH_HEADER_SIZE];
        len_bytes.copy_from_slice(header);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > self.max_message_size {
            return Err(Error::MessageTooLarge {
                size: len,
                max: self.max_message_size,
            });
        }
        let end = LENGTH_HEADER_SIZE + len;
        if buf.len() < end {
            return Ok(None);
        }
        Ok(Some((buf[LENGTH_HEADER_SIZE..end].to_vec(), end)))
    }

    fn encode(&self, payload: &[u8], out: &mut Vec<u8>) -> Result<(), Error> {
        if payload.len() > self.max_message_size {
            return Err(Error::MessageTooLarge {
                size: payload.len(),
                max: self.max_message_size,
            });
        }
        out.reserve(LENGTH_HEADER_SIZE + payload.len());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        Ok(())
    }
}
