//! Legacy MIDI 1.0 short messages packed into single UMP words.

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::message_type::MessageType;
use crate::packet::UmpPacket;

/// Byte length of the legacy message that starts with `status`
/// (status byte included).
///
/// Returns `None` for data bytes and for the SysEx framing bytes 0xF0/0xF7,
/// which have no fixed length.
pub fn legacy_message_len(status: u8) -> Option<usize> {
    match status {
        0x00..=0x7F | 0xF0 | 0xF7 => None,
        0xC0..=0xDF => Some(2),
        0x80..=0xEF => Some(3),
        0xF1 | 0xF3 => Some(2),
        0xF2 => Some(3),
        _ => Some(1),
    }
}

/// Pack a legacy MIDI 1.0 message into a UMP word on group 0.
///
/// Channel voice statuses (0x80-0xEF) become MIDI 1.0 channel voice words,
/// system common and real-time statuses become system words. Data bytes are
/// masked to 7 bits; unused data bytes are zeroed.
pub fn encode_short_message(status: u8, data1: u8, data2: u8) -> Result<u32> {
    let len = legacy_message_len(status).ok_or_else(|| {
        Error::malformed(
            u32::from(status) << 16,
            "status byte has no single-word UMP form",
        )
    })?;
    let mt = if status < 0xF0 {
        MessageType::Midi1ChannelVoice
    } else {
        MessageType::System
    };
    let data1 = if len >= 2 { data1 & 0x7F } else { 0 };
    let data2 = if len >= 3 { data2 & 0x7F } else { 0 };
    Ok((u32::from(mt.nibble()) << 28)
        | (u32::from(status) << 16)
        | (u32::from(data1) << 8)
        | u32::from(data2))
}

/// Inverse of [`encode_short_message`]: the legacy bytes carried by a
/// single-word system or MIDI 1.0 channel voice packet.
///
/// Returns `None` when the packet has no legacy equivalent (multi-word
/// packets, utility messages).
pub fn decode_short_message(packet: &UmpPacket) -> Option<SmallVec<[u8; 3]>> {
    match packet.message_type() {
        MessageType::System | MessageType::Midi1ChannelVoice => {}
        _ => return None,
    }
    let [_, status, data1, data2] = packet.first_word().to_be_bytes();
    let len = legacy_message_len(status)?;
    let mut bytes = SmallVec::new();
    bytes.extend_from_slice(&[status, data1, data2][..len]);
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on_encoding() {
        assert_eq!(encode_short_message(0x90, 0x3C, 0x40).unwrap(), 0x2090_3C40);
    }

    #[test]
    fn test_two_byte_messages_zero_data2() {
        // Program change ignores the second data byte
        assert_eq!(encode_short_message(0xC5, 42, 99).unwrap(), 0x20C5_2A00);
        // Channel pressure
        assert_eq!(encode_short_message(0xD0, 0x7F, 0x7F).unwrap(), 0x20D0_7F00);
    }

    #[test]
    fn test_system_messages() {
        assert_eq!(encode_short_message(0xF8, 0, 0).unwrap(), 0x10F8_0000);
        // Song position pointer carries two data bytes
        assert_eq!(encode_short_message(0xF2, 0x10, 0x20).unwrap(), 0x10F2_1020);
        // Timing clock ignores data
        assert_eq!(encode_short_message(0xF8, 0x12, 0x34).unwrap(), 0x10F8_0000);
    }

    #[test]
    fn test_data_masking() {
        assert_eq!(encode_short_message(0xB0, 0xFF, 0xFF).unwrap(), 0x20B0_7F7F);
    }

    #[test]
    fn test_invalid_status_rejected() {
        assert!(matches!(
            encode_short_message(0x3C, 0, 0),
            Err(Error::MalformedPacket { .. })
        ));
        assert!(encode_short_message(0xF0, 0x7E, 0).is_err());
        assert!(encode_short_message(0xF7, 0, 0).is_err());
    }

    #[test]
    fn test_decode_short_message() {
        let packet = UmpPacket::single(0x2090_3C40).unwrap();
        assert_eq!(decode_short_message(&packet).unwrap().as_slice(), &[0x90, 0x3C, 0x40]);

        let packet = UmpPacket::single(0x20C5_2A00).unwrap();
        assert_eq!(decode_short_message(&packet).unwrap().as_slice(), &[0xC5, 0x2A]);

        let packet = UmpPacket::single(0x10FE_0000).unwrap();
        assert_eq!(decode_short_message(&packet).unwrap().as_slice(), &[0xFE]);
    }

    #[test]
    fn test_decode_rejects_non_legacy() {
        let packet = UmpPacket::single(0x0000_0000).unwrap();
        assert!(decode_short_message(&packet).is_none());

        let packet = UmpPacket::from_words(&[0x4090_3C00, 0xFFFF_0000]).unwrap();
        assert!(decode_short_message(&packet).is_none());
    }
}
