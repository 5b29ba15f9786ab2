//! Property-based tests for the frame and fragment codecs
//!
//! These tests verify that framing is lossless for every header width and that a
//! fragmented payload is rebuilt exactly regardless of chunk arrival order.

use bluechat_core::{split, FragmentAssembler, FrameCodec, GenerationHash};
use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use tokio_util::codec::Decoder;

/// Generate a payload and a chunk size that keep the chunk count within one byte
fn arb_payload_and_chunk() -> impl Strategy<Value = (Vec<u8>, usize)> {
    (1usize..=64).prop_flat_map(|chunk| {
        (
            prop::collection::vec(any::<u8>(), 1..=(chunk * 40).min(2048)),
            Just(chunk),
        )
    })
}

/// Generate a shuffled arrival order for `count` chunks
fn arb_order(count: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..count).collect::<Vec<_>>()).prop_shuffle()
}

proptest! {
    /// Property: decoding an encoded frame yields the original body
    #[test]
    fn frame_roundtrip(body in prop::collection::vec(any::<u8>(), 0..4096), header in 2usize..=8) {
        let mut codec = FrameCodec::new(header).unwrap();
        let encoded = codec.encode(&body).unwrap();
        prop_assert_eq!(encoded.len(), header + body.len());

        let mut buf = BytesMut::from(&encoded[..]);
        let decoded = Decoder::decode(&mut codec, &mut buf).unwrap().unwrap();
        prop_assert_eq!(&decoded[..], &body[..]);
        prop_assert!(buf.is_empty());
    }

    /// Property: chunks fed in any order rebuild the payload with one completion
    #[test]
    fn fragments_reassemble_in_any_order(
        (payload, chunk, order) in arb_payload_and_chunk().prop_flat_map(|(payload, chunk)| {
            let count = payload.len().div_ceil(chunk);
            (Just(payload), Just(chunk), arb_order(count))
        })
    ) {
        let generation = GenerationHash::of(&payload);
        let chunks = split(&payload, chunk).unwrap();
        let total = chunks.len() as u8;
        prop_assert_eq!(chunks.len(), payload.len().div_ceil(chunk));

        let mut assembler = FragmentAssembler::new();
        let mut completions = Vec::new();
        for (step, &index) in order.iter().enumerate() {
            let obs = assembler
                .observe(total, index as u8, generation, chunks[index].clone())
                .unwrap();
            prop_assert_eq!(obs.received, step + 1);
            if let Some(done) = obs.completed {
                completions.push(done);
            }
        }

        prop_assert_eq!(completions.len(), 1);
        prop_assert_eq!(&completions[0].payload, &Bytes::from(payload));
        prop_assert_eq!(completions[0].generation, generation);
    }
}
