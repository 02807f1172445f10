//! The UMP packet: one word group, always handled as a unit.

use std::fmt;

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::message_type::MessageType;

/// A complete Universal MIDI Packet of one, two or four words.
///
/// The word count always matches the message type of the first word, so a
/// `UmpPacket` can never describe a partial packet.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UmpPacket {
    words: [u32; 4],
    len: u8,
}

impl UmpPacket {
    /// Build a packet from its words.
    ///
    /// Fails with [`Error::MalformedPacket`] when the message type is
    /// reserved or `words` does not hold exactly one packet.
    pub fn from_words(words: &[u32]) -> Result<Self> {
        let Some(&first) = words.first() else {
            return Err(Error::malformed(0, "empty packet"));
        };
        let mt = MessageType::from_word(first)
            .ok_or_else(|| Error::malformed(first, "reserved message type"))?;
        if words.len() != mt.word_count() {
            return Err(Error::malformed(
                first,
                "word count does not match message type",
            ));
        }
        let mut buf = [0u32; 4];
        buf[..words.len()].copy_from_slice(words);
        Ok(Self {
            words: buf,
            len: words.len() as u8,
        })
    }

    /// Single-word packet (utility, system, MIDI 1.0 channel voice).
    pub fn single(word: u32) -> Result<Self> {
        Self::from_words(&[word])
    }

    /// Caller guarantees `len` matches the message type of `words[0]`.
    #[inline]
    pub(crate) fn from_raw(words: [u32; 4], len: usize) -> Self {
        debug_assert_eq!(
            MessageType::from_word(words[0]).map(MessageType::word_count),
            Some(len)
        );
        Self {
            words,
            len: len as u8,
        }
    }

    #[inline]
    pub fn words(&self) -> &[u32] {
        &self.words[..self.len as usize]
    }

    #[inline]
    pub fn word_count(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn first_word(&self) -> u32 {
        self.words[0]
    }

    #[inline]
    pub fn message_type(&self) -> MessageType {
        match MessageType::from_word(self.words[0]) {
            Some(mt) => mt,
            None => unreachable!("UmpPacket is validated on construction"),
        }
    }

    /// UMP group (0-15).
    #[inline]
    pub fn group(&self) -> u8 {
        ((self.words[0] >> 24) & 0x0F) as u8
    }

    /// Wire bytes, each word big-endian.
    pub fn to_be_bytes(&self) -> SmallVec<[u8; 16]> {
        self.words()
            .iter()
            .flat_map(|word| word.to_be_bytes())
            .collect()
    }
}

impl TryFrom<&[u32]> for UmpPacket {
    type Error = Error;

    fn try_from(words: &[u32]) -> Result<Self> {
        Self::from_words(words)
    }
}

impl fmt::Debug for UmpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UmpPacket[")?;
        for (i, word) in self.words().iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{word:08X}")?;
        }
        f.write_str("]")
    }
}
