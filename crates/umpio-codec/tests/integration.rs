//! Integration tests for umpio-codec.
//!
//! Exercises the codec the way a transport uses it: framing outbound SysEx,
//! then decoding the resulting byte stream as a receiver would.

use proptest::prelude::*;
use umpio_codec::{
    chunk_sysex, chunk_sysex7, reassemble_sysex, word_count, Error, SysExReassembler, UmpDecoder,
    UmpPacket, MAX_SYSEX_PAYLOAD,
};

// ---------------------------------------------------------------------------
// 1. SysEx round trips
// ---------------------------------------------------------------------------

#[test]
fn test_roundtrip_at_payload_limit() {
    let payload: Vec<u8> = (0..MAX_SYSEX_PAYLOAD).map(|i| (i % 251) as u8).collect();
    let packets: Vec<_> = chunk_sysex(&payload, 0x10).unwrap().collect();
    assert_eq!(packets.len(), MAX_SYSEX_PAYLOAD.div_ceil(13));
    assert_eq!(reassemble_sysex(&packets).unwrap(), payload);
}

#[test]
fn test_oversized_payload_produces_no_packets() {
    let payload = vec![0u8; MAX_SYSEX_PAYLOAD + 1];
    match chunk_sysex(&payload, 0) {
        Err(Error::PayloadTooLarge { len, max }) => {
            assert_eq!(len, 65537);
            assert_eq!(max, 65536);
        }
        other => panic!("expected PayloadTooLarge, got {other:?}"),
    }
    assert!(matches!(
        chunk_sysex7(&payload, 0),
        Err(Error::PayloadTooLarge { .. })
    ));
}

#[test]
fn test_unstarted_stream_continuation() {
    let packets: Vec<_> = chunk_sysex(&[0x42; 64], 5).unwrap().collect();
    // Middle packet of stream 5 retagged as stream 6, which never started
    let mut words = packets[2].words().to_vec();
    words[0] = (words[0] & 0xFFFF_00FF) | (6 << 8);
    let foreign = UmpPacket::from_words(&words).unwrap();

    assert!(matches!(
        reassemble_sysex([foreign]),
        Err(Error::StreamOutOfOrder { stream_id: 6, .. })
    ));
}

// ---------------------------------------------------------------------------
// 2. Wire decoding of framed output
// ---------------------------------------------------------------------------

/// Chunk, serialize, split the byte stream arbitrarily, decode, reassemble.
#[test]
fn test_chunk_decode_reassemble_pipeline() {
    let payload: Vec<u8> = (0..=255u8).collect();
    let bytes: Vec<u8> = chunk_sysex(&payload, 1)
        .unwrap()
        .flat_map(|p| p.to_be_bytes())
        .collect();

    let mut decoder = UmpDecoder::new();
    let mut reassembler = SysExReassembler::new();
    let mut messages = Vec::new();
    for piece in bytes.chunks(7) {
        for packet in decoder.decode(piece) {
            if let Some(message) = reassembler.push(&packet).unwrap() {
                messages.push(message);
            }
        }
    }
    assert_eq!(decoder.pending_bytes(), 0);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].payload, payload);
    assert_eq!(messages[0].stream_id, Some(1));
}

#[test]
fn test_sysex8_wire_layout() {
    let payload: Vec<u8> = (0x01..=0x1E).collect();
    let layout: Vec<String> = chunk_sysex(&payload, 0x2A)
        .unwrap()
        .on_group(3)
        .map(|p| format!("{p:?}"))
        .collect();
    insta::assert_debug_snapshot!("sysex8_wire_layout", layout);
}

// ---------------------------------------------------------------------------
// 3. Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_sysex8_roundtrip(
        payload in prop::collection::vec(any::<u8>(), 0..=MAX_SYSEX_PAYLOAD),
        stream_id in any::<u8>(),
    ) {
        let packets: Vec<_> = chunk_sysex(&payload, stream_id).unwrap().collect();
        prop_assert_eq!(reassemble_sysex(&packets).unwrap(), payload);
    }

    #[test]
    fn prop_sysex7_roundtrip(
        payload in prop::collection::vec(0u8..0x80, 0..2048),
        group in 0u8..16,
    ) {
        let packets: Vec<_> = chunk_sysex7(&payload, group).unwrap().collect();
        prop_assert!(packets.iter().all(|p| p.group() == group));
        prop_assert_eq!(reassemble_sysex(&packets).unwrap(), payload);
    }

    #[test]
    fn prop_word_count_matches_table(first_word in any::<u32>()) {
        let expected = match first_word >> 28 {
            0x0..=0x2 => Some(1),
            0x3 | 0x4 => Some(2),
            0x5 | 0xD | 0xF => Some(4),
            _ => None,
        };
        match (word_count(first_word), expected) {
            (Ok(n), Some(e)) => prop_assert_eq!(n, e),
            (Err(Error::MalformedPacket { .. }), None) => {}
            (got, want) => prop_assert!(false, "word_count {got:?}, expected {want:?}"),
        }
    }

    #[test]
    fn prop_decoder_never_splits_packets(
        payload in prop::collection::vec(any::<u8>(), 0..512),
        split in 1usize..17,
    ) {
        let packets: Vec<_> = chunk_sysex(&payload, 0).unwrap().collect();
        let bytes: Vec<u8> = packets.iter().flat_map(|p| p.to_be_bytes()).collect();

        let mut decoder = UmpDecoder::new();
        let mut decoded = Vec::new();
        for piece in bytes.chunks(split) {
            decoded.extend(decoder.decode(piece));
        }
        prop_assert_eq!(decoded, packets);
    }
}
