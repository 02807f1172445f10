//! UMP message types and packet sizing.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Message type carried in the top nibble of a packet's first word.
///
/// Only the assigned types are represented; reserved nibbles (0x6-0xC, 0xE)
/// are rejected by [`MessageType::from_nibble`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// NOOP, jitter-reduction clock and timestamps (32-bit)
    Utility,
    /// System common and real-time (32-bit)
    System,
    /// MIDI 1.0 channel voice (32-bit)
    Midi1ChannelVoice,
    /// SysEx7 (64-bit)
    Data64,
    /// MIDI 2.0 channel voice (64-bit)
    Midi2ChannelVoice,
    /// SysEx8 and mixed data sets (128-bit)
    Data128,
    /// Flex data (128-bit)
    FlexData,
    /// UMP stream / endpoint messages (128-bit)
    UmpStream,
}

impl MessageType {
    #[inline]
    pub const fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0x0 => Some(Self::Utility),
            0x1 => Some(Self::System),
            0x2 => Some(Self::Midi1ChannelVoice),
            0x3 => Some(Self::Data64),
            0x4 => Some(Self::Midi2ChannelVoice),
            0x5 => Some(Self::Data128),
            0xD => Some(Self::FlexData),
            0xF => Some(Self::UmpStream),
            _ => None,
        }
    }

    #[inline]
    pub const fn from_word(first_word: u32) -> Option<Self> {
        Self::from_nibble((first_word >> 28) as u8)
    }

    #[inline]
    pub const fn nibble(self) -> u8 {
        match self {
            Self::Utility => 0x0,
            Self::System => 0x1,
            Self::Midi1ChannelVoice => 0x2,
            Self::Data64 => 0x3,
            Self::Midi2ChannelVoice => 0x4,
            Self::Data128 => 0x5,
            Self::FlexData => 0xD,
            Self::UmpStream => 0xF,
        }
    }

    /// Number of 32-bit words in a packet of this type.
    #[inline]
    pub const fn word_count(self) -> usize {
        match self {
            Self::Utility | Self::System | Self::Midi1ChannelVoice => 1,
            Self::Data64 | Self::Midi2ChannelVoice => 2,
            Self::Data128 | Self::FlexData | Self::UmpStream => 4,
        }
    }
}

/// Packet size in words for `first_word`.
///
/// Fails with [`Error::MalformedPacket`] when the message type is reserved.
pub fn word_count(first_word: u32) -> Result<usize> {
    MessageType::from_word(first_word)
        .map(MessageType::word_count)
        .ok_or_else(|| Error::malformed(first_word, "reserved message type"))
}

/// Size of any packet, reserved types included.
///
/// The UMP table fixes a size for every nibble so a receiver can skip
/// packets it does not understand without losing word alignment.
#[inline]
pub(crate) const fn framing_word_count(nibble: u8) -> usize {
    match nibble {
        0x0..=0x2 | 0x6 | 0x7 => 1,
        0x3 | 0x4 | 0x8..=0xA => 2,
        0xB | 0xC => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count_table() {
        let expected = [
            (0x0, 1),
            (0x1, 1),
            (0x2, 1),
            (0x3, 2),
            (0x4, 2),
            (0x5, 4),
            (0xD, 4),
            (0xF, 4),
        ];
        for (nibble, words) in expected {
            let first_word = (nibble as u32) << 28 | 0x00AB_CDEF;
            assert_eq!(word_count(first_word).unwrap(), words, "nibble {nibble:#x}");
        }
    }

    #[test]
    fn test_reserved_types_are_malformed() {
        for nibble in [0x6u32, 0x7, 0x8, 0x9, 0xA, 0xB, 0xC, 0xE] {
            let err = word_count(nibble << 28).unwrap_err();
            assert!(matches!(err, Error::MalformedPacket { .. }));
        }
    }

    #[test]
    fn test_nibble_roundtrip() {
        for nibble in 0u8..16 {
            if let Some(mt) = MessageType::from_nibble(nibble) {
                assert_eq!(mt.nibble(), nibble);
                assert_eq!(mt.word_count(), framing_word_count(nibble));
            }
        }
    }

    #[test]
    fn test_framing_covers_96_bit_reserved() {
        assert_eq!(framing_word_count(0xB), 3);
        assert_eq!(framing_word_count(0xC), 3);
        assert_eq!(framing_word_count(0xE), 4);
    }
}
