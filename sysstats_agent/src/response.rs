//! Bounded JSON encoding.
//!
//! Each session owns two [`BoundedBuf`]s with a hard ceiling. Values are
//! serialized straight into them; an encode that would pass the ceiling fails
//! instead of growing the buffer. Collections can be retried with fewer tail
//! elements via [`encode_truncating`].

use serde::Serialize;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response does not fit in {limit} bytes")]
    Overflow { limit: usize },
    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Byte buffer that refuses writes past `limit`.
#[derive(Debug)]
pub struct BoundedBuf {
    bytes: Vec<u8>,
    limit: usize,
}

impl BoundedBuf {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(limit),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Current contents. serde_json only emits UTF-8.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or_default()
    }
}

impl io::Write for BoundedBuf {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.len() > self.limit - self.bytes.len() {
            return Err(io::Error::other("bounded buffer full"));
        }
        self.bytes.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A response whose payload is a list that may lose tail entries to fit.
pub trait Truncate: Serialize {
    fn item_count(&self) -> usize;
    /// Remove the last entry; false when already empty.
    fn pop_tail(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoded {
    pub len: usize,
    pub dropped: usize,
}

/// Single attempt. On failure the buffer is left empty.
pub fn encode_fixed<T: Serialize + ?Sized>(
    buf: &mut BoundedBuf,
    value: &T,
) -> Result<usize, ResponseError> {
    buf.clear();
    match serde_json::to_writer(&mut *buf, value) {
        Ok(()) => Ok(buf.len()),
        Err(e) => {
            buf.clear();
            // The only IO error our writer produces is the ceiling.
            if e.is_io() {
                Err(ResponseError::Overflow { limit: buf.limit() })
            } else {
                Err(ResponseError::Encode(e))
            }
        }
    }
}

/// Encode `value`, popping one tail element per overflow until it fits.
pub fn encode_truncating<T: Truncate>(
    buf: &mut BoundedBuf,
    value: &mut T,
) -> Result<Encoded, ResponseError> {
    let mut dropped = 0;
    loop {
        match encode_fixed(buf, value) {
            Ok(len) => return Ok(Encoded { len, dropped }),
            Err(ResponseError::Overflow { limit }) => {
                if !value.pop_tail() {
                    return Err(ResponseError::Overflow { limit });
                }
                dropped += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
