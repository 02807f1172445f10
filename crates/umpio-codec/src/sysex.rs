//! SysEx framing over Data64 (SysEx7) and Data128 (SysEx8) packets.
//!
//! SysEx8 packet, 16 bytes big-endian:
//! `[0x5g] [status<<4 | n] [stream id] [data x 13]` where `n` counts the
//! stream id byte plus the data bytes in use.
//!
//! SysEx7 packet, 8 bytes big-endian:
//! `[0x3g] [status<<4 | n] [data x 6]` where `n` counts the data bytes.
//!
//! SysEx7 has no stream id byte; its stream is identified by the group.

use std::borrow::Borrow;
use std::collections::HashMap;

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::message_type::MessageType;
use crate::packet::UmpPacket;
use crate::MAX_SYSEX_PAYLOAD;

const SYSEX8_MAX_DATA: usize = 13;
const SYSEX7_MAX_DATA: usize = 6;

/// Position of a packet within its SysEx stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SysExStatus {
    /// Whole message in one packet
    Complete,
    Start,
    Continue,
    End,
}

impl SysExStatus {
    #[inline]
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Complete),
            1 => Some(Self::Start),
            2 => Some(Self::Continue),
            3 => Some(Self::End),
            _ => None,
        }
    }

    #[inline]
    fn bits(self) -> u8 {
        match self {
            Self::Complete => 0,
            Self::Start => 1,
            Self::Continue => 2,
            Self::End => 3,
        }
    }

    #[inline]
    fn for_position(first: bool, last: bool) -> Self {
        match (first, last) {
            (true, true) => Self::Complete,
            (true, false) => Self::Start,
            (false, false) => Self::Continue,
            (false, true) => Self::End,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SysExFormat {
    /// Data64 packets, 7-bit payload bytes
    SevenBit,
    /// Data128 packets, 8-bit payload bytes with a stream id
    EightBit,
}

/// One parsed SysEx packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SysExFragment {
    pub format: SysExFormat,
    pub group: u8,
    pub status: SysExStatus,
    /// Present for SysEx8 only.
    pub stream_id: Option<u8>,
    pub data: SmallVec<[u8; SYSEX8_MAX_DATA]>,
}

impl SysExFragment {
    /// True when `packet` is a SysEx7 or SysEx8 packet (mixed data set
    /// packets share the Data128 type but are not SysEx).
    pub fn is_sysex(packet: &UmpPacket) -> bool {
        let status = (packet.first_word() >> 20) & 0x0F;
        match packet.message_type() {
            MessageType::Data64 => status <= 3,
            MessageType::Data128 => status <= 3,
            _ => false,
        }
    }

    pub fn parse(packet: &UmpPacket) -> Result<Self> {
        let first = packet.first_word();
        let bytes = packet.to_be_bytes();
        let status = SysExStatus::from_bits(bytes[1] >> 4)
            .ok_or_else(|| Error::malformed(first, "not a SysEx status"))?;
        let count = (bytes[1] & 0x0F) as usize;
        let group = packet.group();

        match packet.message_type() {
            MessageType::Data64 => {
                if count > SYSEX7_MAX_DATA {
                    return Err(Error::malformed(first, "SysEx7 byte count above 6"));
                }
                Ok(Self {
                    format: SysExFormat::SevenBit,
                    group,
                    status,
                    stream_id: None,
                    data: SmallVec::from_slice(&bytes[2..2 + count]),
                })
            }
            MessageType::Data128 => {
                if count == 0 || count > SYSEX8_MAX_DATA + 1 {
                    return Err(Error::malformed(first, "SysEx8 byte count out of range"));
                }
                Ok(Self {
                    format: SysExFormat::EightBit,
                    group,
                    status,
                    stream_id: Some(bytes[2]),
                    data: SmallVec::from_slice(&bytes[3..2 + count]),
                })
            }
            _ => Err(Error::malformed(first, "not a SysEx packet")),
        }
    }

    fn stream_key(&self) -> StreamKey {
        (self.format, self.group, self.stream_id.unwrap_or(0))
    }

    /// Identifier reported in errors: the stream id, or the group for SysEx7.
    fn reported_id(&self) -> u8 {
        self.stream_id.unwrap_or(self.group)
    }
}

fn words_from_bytes(bytes: &[u8; 16], len: usize) -> UmpPacket {
    let mut words = [0u32; 4];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)).take(len) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    UmpPacket::from_raw(words, len)
}

fn sysex8_packet(group: u8, status: SysExStatus, stream_id: u8, data: &[u8]) -> UmpPacket {
    debug_assert!(data.len() <= SYSEX8_MAX_DATA);
    let mut bytes = [0u8; 16];
    bytes[0] = (MessageType::Data128.nibble() << 4) | (group & 0x0F);
    bytes[1] = (status.bits() << 4) | (data.len() as u8 + 1);
    bytes[2] = stream_id;
    bytes[3..3 + data.len()].copy_from_slice(data);
    words_from_bytes(&bytes, 4)
}

fn sysex7_packet(group: u8, status: SysExStatus, data: &[u8]) -> UmpPacket {
    debug_assert!(data.len() <= SYSEX7_MAX_DATA);
    let mut bytes = [0u8; 16];
    bytes[0] = (MessageType::Data64.nibble() << 4) | (group & 0x0F);
    bytes[1] = (status.bits() << 4) | data.len() as u8;
    bytes[2..2 + data.len()].copy_from_slice(data);
    words_from_bytes(&bytes, 2)
}

/// Walks a payload in fixed-size pieces, tagging first and last.
#[derive(Clone, Debug)]
struct Chunker<'a> {
    payload: &'a [u8],
    offset: usize,
    max: usize,
    finished: bool,
}

impl<'a> Chunker<'a> {
    fn new(payload: &'a [u8], max: usize) -> Self {
        Self {
            payload,
            offset: 0,
            max,
            finished: false,
        }
    }

    fn next_piece(&mut self) -> Option<(SysExStatus, &'a [u8])> {
        if self.finished {
            return None;
        }
        let take = (self.payload.len() - self.offset).min(self.max);
        let piece = &self.payload[self.offset..self.offset + take];
        let first = self.offset == 0;
        self.offset += take;
        let last = self.offset == self.payload.len();
        self.finished = last;
        Some((SysExStatus::for_position(first, last), piece))
    }

    fn remaining(&self) -> usize {
        if self.finished {
            0
        } else {
            (self.payload.len() - self.offset).div_ceil(self.max).max(1)
        }
    }
}

fn check_payload_len(payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_SYSEX_PAYLOAD {
        return Err(Error::PayloadTooLarge {
            len: payload.len(),
            max: MAX_SYSEX_PAYLOAD,
        });
    }
    Ok(())
}

/// SysEx8 packets for a payload, produced by [`chunk_sysex`].
///
/// Clones are independent; each walks the payload on from the position it
/// was cloned at.
#[derive(Clone, Debug)]
pub struct SysEx8Chunks<'a> {
    chunker: Chunker<'a>,
    stream_id: u8,
    group: u8,
}

impl SysEx8Chunks<'_> {
    /// Send on `group` instead of group 0.
    pub fn on_group(mut self, group: u8) -> Self {
        self.group = group & 0x0F;
        self
    }

    pub fn stream_id(&self) -> u8 {
        self.stream_id
    }
}

impl Iterator for SysEx8Chunks<'_> {
    type Item = UmpPacket;

    fn next(&mut self) -> Option<UmpPacket> {
        let (status, piece) = self.chunker.next_piece()?;
        Some(sysex8_packet(self.group, status, self.stream_id, piece))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.chunker.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for SysEx8Chunks<'_> {}

/// SysEx7 packets for a 7-bit payload, produced by [`chunk_sysex7`].
#[derive(Clone, Debug)]
pub struct SysEx7Chunks<'a> {
    chunker: Chunker<'a>,
    group: u8,
}

impl Iterator for SysEx7Chunks<'_> {
    type Item = UmpPacket;

    fn next(&mut self) -> Option<UmpPacket> {
        let (status, piece) = self.chunker.next_piece()?;
        Some(sysex7_packet(self.group, status, piece))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.chunker.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for SysEx7Chunks<'_> {}

/// Split `payload` into SysEx8 packets of at most 13 data bytes.
///
/// An empty payload yields a single empty `Complete` packet. Payloads above
/// [`MAX_SYSEX_PAYLOAD`] fail with [`Error::PayloadTooLarge`] before any
/// packet is produced.
pub fn chunk_sysex(payload: &[u8], stream_id: u8) -> Result<SysEx8Chunks<'_>> {
    check_payload_len(payload)?;
    Ok(SysEx8Chunks {
        chunker: Chunker::new(payload, SYSEX8_MAX_DATA),
        stream_id,
        group: 0,
    })
}

/// Split a 7-bit `payload` (no 0xF0/0xF7 framing) into SysEx7 packets of at
/// most 6 bytes on `group`.
pub fn chunk_sysex7(payload: &[u8], group: u8) -> Result<SysEx7Chunks<'_>> {
    check_payload_len(payload)?;
    if let Some(&byte) = payload.iter().find(|&&b| b > 0x7F) {
        return Err(Error::malformed(
            u32::from(byte),
            "SysEx7 payload byte exceeds 7 bits",
        ));
    }
    Ok(SysEx7Chunks {
        chunker: Chunker::new(payload, SYSEX7_MAX_DATA),
        group: group & 0x0F,
    })
}

/// A fully reassembled SysEx message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SysExMessage {
    pub format: SysExFormat,
    pub group: u8,
    pub stream_id: Option<u8>,
    pub payload: Vec<u8>,
}

type StreamKey = (SysExFormat, u8, u8);

/// Reassembles interleaved SysEx streams, keyed by format, group and
/// stream id.
#[derive(Debug)]
pub struct SysExReassembler {
    streams: HashMap<StreamKey, Vec<u8>>,
    max_payload: usize,
}

impl Default for SysExReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl SysExReassembler {
    pub fn new() -> Self {
        Self {
            streams: HashMap::new(),
            max_payload: MAX_SYSEX_PAYLOAD,
        }
    }

    /// Feed one packet. Returns the message once its final packet arrives.
    ///
    /// A failed stream is discarded so later streams with the same id start
    /// clean.
    pub fn push(&mut self, packet: &UmpPacket) -> Result<Option<SysExMessage>> {
        let fragment = SysExFragment::parse(packet)?;
        self.accept(fragment)
    }

    fn accept(&mut self, fragment: SysExFragment) -> Result<Option<SysExMessage>> {
        let key = fragment.stream_key();
        let out_of_order = |reason| Error::StreamOutOfOrder {
            stream_id: fragment.reported_id(),
            reason,
        };

        match fragment.status {
            SysExStatus::Complete | SysExStatus::Start => {
                if self.streams.remove(&key).is_some() {
                    return Err(out_of_order("new message inside an open stream"));
                }
                if fragment.status == SysExStatus::Start {
                    self.streams.insert(key, fragment.data.to_vec());
                    return Ok(None);
                }
                Ok(Some(Self::message(&fragment, fragment.data.to_vec())))
            }
            SysExStatus::Continue | SysExStatus::End => {
                let Some(buffer) = self.streams.get_mut(&key) else {
                    return Err(out_of_order("continuation without a start packet"));
                };
                buffer.extend_from_slice(&fragment.data);
                if buffer.len() > self.max_payload {
                    let len = buffer.len();
                    self.streams.remove(&key);
                    return Err(Error::PayloadTooLarge {
                        len,
                        max: self.max_payload,
                    });
                }
                if fragment.status == SysExStatus::Continue {
                    return Ok(None);
                }
                let payload = self.streams.remove(&key).unwrap_or_default();
                Ok(Some(Self::message(&fragment, payload)))
            }
        }
    }

    fn message(fragment: &SysExFragment, payload: Vec<u8>) -> SysExMessage {
        SysExMessage {
            format: fragment.format,
            group: fragment.group,
            stream_id: fragment.stream_id,
            payload,
        }
    }

    /// Streams started but not yet terminated.
    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.streams.values().map(Vec::len).sum()
    }

    pub fn reset(&mut self) {
        self.streams.clear();
    }
}

/// Inverse of [`chunk_sysex`] / [`chunk_sysex7`] for exactly one stream.
///
/// Fails with [`Error::StreamOutOfOrder`] on a continuation without a start,
/// a packet from another stream, or anything after the terminating packet;
/// fails with [`Error::IncompleteStream`] when the packets run out first.
pub fn reassemble_sysex<I>(packets: I) -> Result<Vec<u8>>
where
    I: IntoIterator,
    I::Item: Borrow<UmpPacket>,
{
    let mut reassembler = SysExReassembler::new();
    let mut stream: Option<(StreamKey, u8)> = None;
    let mut complete: Option<Vec<u8>> = None;

    for packet in packets {
        let fragment = SysExFragment::parse(packet.borrow())?;
        let key = fragment.stream_key();
        let id = fragment.reported_id();

        if complete.is_some() {
            return Err(Error::StreamOutOfOrder {
                stream_id: id,
                reason: "packet after the end of the stream",
            });
        }
        match stream {
            Some((expected, _)) if expected != key => {
                return Err(Error::StreamOutOfOrder {
                    stream_id: id,
                    reason: "packet belongs to a different stream",
                });
            }
            Some(_) => {}
            None => stream = Some((key, id)),
        }
        if let Some(message) = reassembler.accept(fragment)? {
            complete = Some(message.payload);
        }
    }

    complete.ok_or_else(|| Error::IncompleteStream {
        stream_id: stream.map(|(_, id)| id),
        received: reassembler.buffered_bytes(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_single_complete_packet() {
        let packets: Vec<_> = chunk_sysex(&[], 7).unwrap().collect();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].words(), &[0x5001_0700, 0, 0, 0]);
        assert!(reassemble_sysex(&packets).unwrap().is_empty());
    }

    #[test]
    fn test_sysex8_layout() {
        let payload: Vec<u8> = (1..=14).collect();
        let packets: Vec<_> = chunk_sysex(&payload, 0x42).unwrap().collect();
        assert_eq!(packets.len(), 2);
        // Start: 13 data bytes + stream id
        assert_eq!(
            packets[0].words(),
            &[0x501E_4201, 0x0203_0405, 0x0607_0809, 0x0A0B_0C0D]
        );
        // End: 1 data byte + stream id
        assert_eq!(packets[1].words(), &[0x5032_420E, 0, 0, 0]);
    }

    #[test]
    fn test_status_tags() {
        let payload = vec![0xAA; 40];
        let chunks = chunk_sysex(&payload, 1).unwrap();
        assert_eq!(chunks.len(), 4);
        let statuses: Vec<_> = chunks
            .map(|p| SysExFragment::parse(&p).unwrap().status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                SysExStatus::Start,
                SysExStatus::Continue,
                SysExStatus::Continue,
                SysExStatus::End
            ]
        );
    }

    #[test]
    fn test_chunks_are_restartable() {
        let payload = vec![0x11; 30];
        let chunks = chunk_sysex(&payload, 2).unwrap();
        let a: Vec<_> = chunks.clone().collect();
        let b: Vec<_> = chunks.collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_payload_limit() {
        let payload = vec![0u8; MAX_SYSEX_PAYLOAD + 1];
        assert_eq!(
            chunk_sysex(&payload, 0).unwrap_err(),
            Error::PayloadTooLarge {
                len: MAX_SYSEX_PAYLOAD + 1,
                max: MAX_SYSEX_PAYLOAD
            }
        );
        assert!(chunk_sysex(&payload[1..], 0).is_ok());
    }

    #[test]
    fn test_sysex7_layout_and_roundtrip() {
        let payload = [0x7E, 0x7F, 0x06, 0x01, 0x10, 0x20, 0x30];
        let packets: Vec<_> = chunk_sysex7(&payload, 3).unwrap().collect();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].words(), &[0x3316_7E7F, 0x0601_1020]);
        assert_eq!(packets[1].words(), &[0x3331_3000, 0]);
        assert_eq!(reassemble_sysex(&packets).unwrap(), payload);
    }

    #[test]
    fn test_sysex7_rejects_8bit_bytes() {
        assert!(matches!(
            chunk_sysex7(&[0x01, 0x80], 0),
            Err(Error::MalformedPacket { .. })
        ));
    }

    #[test]
    fn test_continuation_without_start() {
        let payload = vec![0x55; 30];
        let packets: Vec<_> = chunk_sysex(&payload, 9).unwrap().collect();
        let err = reassemble_sysex(&packets[1..]).unwrap_err();
        assert!(matches!(err, Error::StreamOutOfOrder { stream_id: 9, .. }));
    }

    #[test]
    fn test_missing_end_is_incomplete() {
        let payload = vec![0x55; 30];
        let packets: Vec<_> = chunk_sysex(&payload, 9).unwrap().collect();
        let err = reassemble_sysex(&packets[..2]).unwrap_err();
        assert_eq!(
            err,
            Error::IncompleteStream {
                stream_id: Some(9),
                received: 26
            }
        );
    }

    #[test]
    fn test_foreign_stream_rejected() {
        let a: Vec<_> = chunk_sysex(&[1u8; 20], 1).unwrap().collect();
        let b: Vec<_> = chunk_sysex(&[2u8; 20], 2).unwrap().collect();
        let mixed = [a[0], b[0], a[1]];
        assert!(matches!(
            reassemble_sysex(mixed).unwrap_err(),
            Error::StreamOutOfOrder { stream_id: 2, .. }
        ));
    }

    #[test]
    fn test_trailing_packet_rejected() {
        let a: Vec<_> = chunk_sysex(&[1u8; 5], 1).unwrap().collect();
        let doubled = [a[0], a[0]];
        assert!(matches!(
            reassemble_sysex(doubled).unwrap_err(),
            Error::StreamOutOfOrder { .. }
        ));
    }

    #[test]
    fn test_reassembler_interleaved_streams() {
        let a: Vec<_> = chunk_sysex(&[1u8; 20], 1).unwrap().collect();
        let b: Vec<_> = chunk_sysex(&[2u8; 20], 2).unwrap().collect();

        let mut reassembler = SysExReassembler::new();
        assert!(reassembler.push(&a[0]).unwrap().is_none());
        assert!(reassembler.push(&b[0]).unwrap().is_none());
        assert_eq!(reassembler.open_streams(), 2);

        let msg_b = reassembler.push(&b[1]).unwrap().unwrap();
        assert_eq!(msg_b.stream_id, Some(2));
        assert_eq!(msg_b.payload, vec![2u8; 20]);

        let msg_a = reassembler.push(&a[1]).unwrap().unwrap();
        assert_eq!(msg_a.payload, vec![1u8; 20]);
        assert_eq!(reassembler.open_streams(), 0);
    }

    #[test]
    fn test_restart_inside_open_stream() {
        let a: Vec<_> = chunk_sysex(&[1u8; 20], 1).unwrap().collect();
        let mut reassembler = SysExReassembler::new();
        reassembler.push(&a[0]).unwrap();
        assert!(reassembler.push(&a[0]).is_err());
        // The failed stream is dropped, so a fresh start works again
        assert!(reassembler.push(&a[0]).unwrap().is_none());
    }

    #[test]
    fn test_is_sysex() {
        let sysex = chunk_sysex(&[1, 2], 0).unwrap().next().unwrap();
        assert!(SysExFragment::is_sysex(&sysex));

        // Mixed data set header shares Data128
        let mds = UmpPacket::from_words(&[0x5080_0000, 0, 0, 0]).unwrap();
        assert!(!SysExFragment::is_sysex(&mds));

        let note = UmpPacket::single(0x2090_3C40).unwrap();
        assert!(!SysExFragment::is_sysex(&note));
    }
}
