// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use bytes::BytesMut;
use rand::Rng;
use ribtunnel::wire::{decode_frame, fragment_into_packets};

/// Random 0-2000 byte payloads, each arbitrarily split across several
/// `send` requests, decode back into the same logical byte stream with the
/// `is_last` boundary landing on exactly the final fragment.
#[test]
fn random_payloads_round_trip_through_arbitrary_splits() -> Result<()> {
    let mut rng = rand::rng();

    for _ in 0..200 {
        let len = rng.random_range(0..=2000usize);
        let payload: Vec<u8> = (0..len).map(|_| rng.random()).collect();

        // Split the payload at 0-4 arbitrary points to model a producer
        // that hands the egress path several independent `send` requests
        // for one logical message.
        let mut cut_points: Vec<usize> =
            (0..rng.random_range(0..=4)).map(|_| rng.random_range(0..=len)).collect();
        cut_points.sort_unstable();
        cut_points.dedup();

        let mut buf = BytesMut::new();
        let mut start = 0;
        let mut chunks = Vec::new();
        for &cut in &cut_points {
            chunks.push(start..cut);
            start = cut;
        }
        chunks.push(start..len);

        let last_idx = chunks.len() - 1;
        for (i, range) in chunks.into_iter().enumerate() {
            fragment_into_packets(&mut buf, 42, i == last_idx, &payload[range]);
        }

        let mut reassembled = Vec::new();
        let mut saw_is_last = false;
        while let Some(pkt) = decode_frame(&mut buf).expect("well-formed frames") {
            assert_eq!(pkt.session_id, 42);
            assert!(!saw_is_last, "frame arrived after is_last was already seen");
            reassembled.extend_from_slice(&pkt.payload);
            saw_is_last = pkt.is_last;
        }

        assert!(buf.is_empty());
        assert!(saw_is_last, "no frame ever carried is_last");
        assert_eq!(reassembled, payload);
    }

    Ok(())
}

