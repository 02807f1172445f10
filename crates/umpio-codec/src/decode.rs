//! Inbound decoding of big-endian UMP byte streams.
//!
//! Backends hand over whatever the OS delivered: a read may end in the middle
//! of a word, or in the middle of a multi-word packet. [`UmpDecoder`] keeps
//! the unfinished tail and only ever yields whole packets.

use crate::message_type::{framing_word_count, MessageType};
use crate::packet::UmpPacket;

#[derive(Debug, Default)]
pub struct UmpDecoder {
    /// Received bytes not yet folded into words.
    bytes: Vec<u8>,
    /// Read position within `bytes`.
    cursor: usize,
    /// Words of the packet currently being assembled.
    words: [u32; 4],
    filled: usize,
    skipped: u64,
}

impl UmpDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return the packets that are now complete.
    ///
    /// The iterator is lazy; packets it does not yield before being dropped
    /// stay buffered and come out of the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> DecodedPackets<'_> {
        if self.cursor > 0 {
            self.bytes.drain(..self.cursor);
            self.cursor = 0;
        }
        self.bytes.extend_from_slice(bytes);
        DecodedPackets { decoder: self }
    }

    /// Bytes held back because they do not yet form a whole packet.
    pub fn pending_bytes(&self) -> usize {
        (self.bytes.len() - self.cursor) + self.filled * 4
    }

    /// Packets dropped because their message type is reserved.
    pub fn skipped_packets(&self) -> u64 {
        self.skipped
    }

    /// Discard any partial packet.
    pub fn reset(&mut self) {
        self.bytes.clear();
        self.cursor = 0;
        self.filled = 0;
    }

    fn next_word(&mut self) -> Option<u32> {
        let rest = &self.bytes[self.cursor..];
        let word: [u8; 4] = rest.get(..4)?.try_into().ok()?;
        self.cursor += 4;
        Some(u32::from_be_bytes(word))
    }

    fn accept(&mut self, word: u32) -> Option<UmpPacket> {
        self.words[self.filled] = word;
        self.filled += 1;

        let nibble = (self.words[0] >> 28) as u8;
        let needed = framing_word_count(nibble);
        if self.filled < needed {
            return None;
        }
        self.filled = 0;

        if MessageType::from_nibble(nibble).is_some() {
            let mut words = [0u32; 4];
            words[..needed].copy_from_slice(&self.words[..needed]);
            Some(UmpPacket::from_raw(words, needed))
        } else {
            self.skipped += 1;
            tracing::warn!(
                "Dropping UMP packet with reserved message type {:#x} ({} words)",
                nibble,
                needed
            );
            None
        }
    }
}

/// Lazy sequence of packets produced by [`UmpDecoder::decode`].
pub struct DecodedPackets<'a> {
    decoder: &'a mut UmpDecoder,
}

impl Iterator for DecodedPackets<'_> {
    type Item = UmpPacket;

    fn next(&mut self) -> Option<UmpPacket> {
        loop {
            let word = self.decoder.next_word()?;
            if let Some(packet) = self.decoder.accept(word) {
                return Some(packet);
            }
        }
    }
}
