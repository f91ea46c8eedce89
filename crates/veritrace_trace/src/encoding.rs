//! Canonical encoding for cross-platform reproducibility.
//!
//! Uses postcard for byte-stable encoding; frames are prefixed with a
//! big-endian `u32` length.

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Largest frame accepted when decoding
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Trait for canonical serialization
pub trait CanonicalEncode: Serialize {
    /// Encode to canonical bytes
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        postcard::to_allocvec(self).map_err(|e| EncodeError::Serialize {
            reason: e.to_string(),
        })
    }
}

/// Trait for canonical deserialization
pub trait CanonicalDecode<'de>: Deserialize<'de> {
    /// Decode from canonical bytes
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid encoding
    fn decode(data: &'de [u8]) -> Result<Self, DecodeError>
    where
        Self: Sized,
    {
        postcard::from_bytes(data).map_err(|e| DecodeError::InvalidEncoding {
            reason: e.to_string(),
        })
    }
}

impl<'de, T: Deserialize<'de>> CanonicalDecode<'de> for T {}

/// Encoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// Serializer rejected the value
    #[error("Serialization failed: {reason}")]
    Serialize {
        /// Serializer message
        reason: String,
    },
    /// Frame exceeds the length prefix range
    #[error("Frame too large: {len} bytes")]
    FrameTooLarge {
        /// Encoded length
        len: usize,
    },
    /// Underlying writer failed
    #[error("Write failed: {reason}")]
    Io {
        /// I/O message
        reason: String,
    },
}

/// Decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Invalid encoding
    #[error("Invalid canonical encoding: {reason}")]
    InvalidEncoding {
        /// Deserializer message
        reason: String,
    },
    /// Input ended inside a frame
    #[error("Truncated frame")]
    TruncatedFrame,
    /// Declared frame length above [`MAX_FRAME_LEN`]
    #[error("Frame length {len} exceeds limit")]
    FrameTooLarge {
        /// Declared length
        len: usize,
    },
    /// Underlying reader failed
    #[error("Read failed: {reason}")]
    Io {
        /// I/O message
        reason: String,
    },
}

/// Length-prefixed frame writer
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    /// Create a new frame writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write raw bytes as one frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame is too large or the write fails
    pub fn write_frame(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| EncodeError::FrameTooLarge { len: bytes.len() })?;
        let io_err = |e: io::Error| EncodeError::Io {
            reason: e.to_string(),
        };
        self.writer.write_all(&len.to_be_bytes()).map_err(io_err)?;
        self.writer.write_all(bytes).map_err(io_err)?;
        Ok(())
    }

    /// Encode a value and write it as one frame
    ///
    /// # Errors
    ///
    /// Returns error if encoding or writing fails
    pub fn encode<T: CanonicalEncode>(&mut self, value: &T) -> Result<(), EncodeError> {
        let bytes = value.encode()?;
        self.write_frame(&bytes)
    }

    /// Flush the writer
    ///
    /// # Errors
    ///
    /// Returns error if the flush fails
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Consume and return the inner writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Length-prefixed frame reader
pub struct FrameReader<R> {
    reader: R,
}

impl<R: Read> FrameReader<R> {
    /// Create a new frame reader
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read the next raw frame; `None` at a clean end of input
    ///
    /// # Errors
    ///
    /// Returns error on a partial length prefix, partial body, or oversized frame
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        let mut len_bytes = [0u8; 4];
        let mut filled = 0;
        while filled < len_bytes.len() {
            match self.reader.read(&mut len_bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(DecodeError::Io {
                        reason: e.to_string(),
                    });
                }
            }
        }

        match filled {
            0 => return Ok(None),
            4 => {}
            _ => return Err(DecodeError::TruncatedFrame),
        }

        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            return Err(DecodeError::FrameTooLarge { len });
        }

        let mut buffer = vec![0u8; len];
        self.reader.read_exact(&mut buffer).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                DecodeError::TruncatedFrame
            } else {
                DecodeError::Io {
                    reason: e.to_string(),
                }
            }
        })?;
        Ok(Some(buffer))
    }

    /// Decode the next value; `None` at a clean end of input
    ///
    /// # Errors
    ///
    /// Returns error if the frame is malformed
    pub fn decode<T: for<'de> Deserialize<'de>>(&mut self) -> Result<Option<T>, DecodeError> {
        match self.read_frame()? {
            Some(bytes) => postcard::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| DecodeError::InvalidEncoding {
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Consume and return the inner reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}
