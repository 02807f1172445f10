//! Universal MIDI Packet (UMP) codec.
//!
//! Pure transforms shared by every transport backend:
//! - [`word_count`] / [`MessageType`]: packet sizing from the message-type nibble
//! - [`UmpPacket`]: an atomic group of one, two or four 32-bit words
//! - [`encode_short_message`]: legacy MIDI 1.0 bytes packed into a single UMP word
//! - [`UmpDecoder`]: buffered decoding of a big-endian inbound byte stream
//! - [`chunk_sysex`] / [`reassemble_sysex`]: SysEx8 (and SysEx7) framing
//!
//! # Example
//!
//! ```
//! use umpio_codec::{chunk_sysex, reassemble_sysex, word_count};
//!
//! assert_eq!(word_count(0x2090_3C40).unwrap(), 1);
//!
//! let payload = [0x7E, 0x7F, 0x06, 0x01];
//! let packets: Vec<_> = chunk_sysex(&payload, 3).unwrap().collect();
//! assert_eq!(reassemble_sysex(&packets).unwrap(), payload);
//! ```

pub mod error;
pub use error::{Error, Result};

mod decode;
mod message_type;
mod packet;
mod short;
mod sysex;

pub use decode::{DecodedPackets, UmpDecoder};
pub use message_type::{word_count, MessageType};
pub use packet::UmpPacket;
pub use short::{decode_short_message, encode_short_message, legacy_message_len};
pub use sysex::{
    chunk_sysex, chunk_sysex7, reassemble_sysex, SysEx7Chunks, SysEx8Chunks, SysExFormat,
    SysExFragment, SysExMessage, SysExReassembler, SysExStatus,
};

/// Largest SysEx payload accepted by [`chunk_sysex`] and [`SysExReassembler`].
pub const MAX_SYSEX_PAYLOAD: usize = 65536;
