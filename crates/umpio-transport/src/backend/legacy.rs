//! Translation between UMP and legacy MIDI 1.0 byte messages.
//!
//! Used by backends that only speak MIDI 1.0 (WinMM) and by the virtual
//! backend's legacy-only mode.

use smallvec::SmallVec;
use umpio_codec::{
    chunk_sysex7, decode_short_message, encode_short_message, legacy_message_len, UmpPacket,
};

use crate::error::{Error, Result};

/// Legacy bytes for a packet, or [`Error::UnsupportedOnBackend`] when the
/// packet has no 1-3 byte equivalent.
pub fn packet_to_legacy(backend: &'static str, packet: &UmpPacket) -> Result<SmallVec<[u8; 3]>> {
    if packet.word_count() > 1 {
        return Err(Error::unsupported(
            backend,
            "send",
            format!(
                "{}-word {:?} packet; only single-word MIDI 1.0 messages are accepted",
                packet.word_count(),
                packet.message_type()
            ),
        ));
    }
    decode_short_message(packet).ok_or_else(|| {
        Error::unsupported(
            backend,
            "send",
            format!("{:?} message has no MIDI 1.0 form", packet.message_type()),
        )
    })
}

/// Convert one legacy message (as delivered by the OS) into UMP packets.
///
/// SysEx (`F0 .. F7`) becomes SysEx7 packets on group 0; everything else a
/// single word.
pub fn legacy_to_packets(bytes: &[u8]) -> Result<SmallVec<[UmpPacket; 1]>> {
    let Some(&status) = bytes.first() else {
        return Ok(SmallVec::new());
    };

    if status == 0xF0 {
        let body = &bytes[1..];
        let body = body.strip_suffix(&[0xF7]).unwrap_or(body);
        return Ok(chunk_sysex7(body, 0)?.collect());
    }

    let len = legacy_message_len(status).unwrap_or(bytes.len());
    let data1 = if len > 1 { bytes.get(1).copied().unwrap_or(0) } else { 0 };
    let data2 = if len > 2 { bytes.get(2).copied().unwrap_or(0) } else { 0 };
    let word = encode_short_message(status, data1, data2)?;
    Ok(smallvec::smallvec![UmpPacket::single(word)?])
}

/// Serialize packets as big-endian words, the inbound format every backend
/// hands to the session worker.
pub fn packets_to_bytes<'a>(packets: impl IntoIterator<Item = &'a UmpPacket>) -> Vec<u8> {
    packets
        .into_iter()
        .flat_map(|p| p.to_be_bytes())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use umpio_codec::{chunk_sysex, reassemble_sysex};

    #[test]
    fn test_note_on_to_legacy() {
        let packet = UmpPacket::single(0x2090_3C40).unwrap();
        assert_eq!(
            packet_to_legacy("test", &packet).unwrap().as_slice(),
            &[0x90, 0x3C, 0x40]
        );
    }

    #[test]
    fn test_multi_word_unsupported() {
        let packet = UmpPacket::from_words(&[0x4090_3C00, 0xFFFF_0000]).unwrap();
        let err = packet_to_legacy("winmm", &packet).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedOnBackend {
                backend: "winmm",
                operation: "send",
                ..
            }
        ));

        let sysex = chunk_sysex(&[1, 2, 3], 0).unwrap().next().unwrap();
        assert!(packet_to_legacy("winmm", &sysex).is_err());
    }

    #[test]
    fn test_utility_unsupported() {
        let packet = UmpPacket::single(0x0000_0000).unwrap();
        assert!(matches!(
            packet_to_legacy("winmm", &packet),
            Err(Error::UnsupportedOnBackend { .. })
        ));
    }

    #[test]
    fn test_inbound_short_messages() {
        let packets = legacy_to_packets(&[0x80, 0x3C, 0x00]).unwrap();
        assert_eq!(packets.as_slice(), &[UmpPacket::single(0x2080_3C00).unwrap()]);

        let packets = legacy_to_packets(&[0xF8]).unwrap();
        assert_eq!(packets.as_slice(), &[UmpPacket::single(0x10F8_0000).unwrap()]);

        assert!(legacy_to_packets(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_inbound_sysex_becomes_sysex7() {
        let bytes = [0xF0, 0x7E, 0x7F, 0x06, 0x01, 0x00, 0x11, 0x22, 0xF7];
        let packets = legacy_to_packets(&bytes).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(reassemble_sysex(&packets).unwrap(), &bytes[1..8]);
    }

    #[test]
    fn test_packets_to_bytes() {
        let packets = [UmpPacket::single(0x2090_3C40).unwrap()];
        assert_eq!(packets_to_bytes(&packets), vec![0x20, 0x90, 0x3C, 0x40]);
    }
}
