//! Error types for the UMP codec.

use thiserror::Error;

/// Validation failures. Every variant is a pure function of the input and is
/// returned synchronously; nothing in the codec retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed UMP packet {word:#010x}: {reason}")]
    MalformedPacket { word: u32, reason: &'static str },

    #[error("SysEx payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("SysEx stream {stream_id} out of order: {reason}")]
    StreamOutOfOrder { stream_id: u8, reason: &'static str },

    #[error("SysEx stream ended without a terminating packet ({received} bytes buffered)")]
    IncompleteStream {
        stream_id: Option<u8>,
        received: usize,
    },
}

impl Error {
    pub(crate) fn malformed(word: u32, reason: &'static str) -> Self {
        Error::MalformedPacket { word, reason }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
