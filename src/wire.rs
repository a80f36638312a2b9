// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Wire framing for the backbone protocol.
//!
//! Every frame on the backbone socket is an 8-byte header followed by 0-1000
//! bytes of payload. All multi-byte integers are big-endian.
//!
//! ```text
//!  0      2           4        6        8
//!  +------+-----------+--------+--------+
//!  | magic| session_id| length | flags  |  payload[length]
//!  +------+-----------+--------+--------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use zerocopy::{BigEndian, FromBytes, Immutable, IntoBytes, KnownLayout, U16};

/// Magic value every frame header must start with.
pub const MAGIC: u16 = 0xFFFF;
/// Maximum payload bytes carried by a single frame.
pub const MAX_PACKET_LENGTH: usize = 1000;
/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 8;

/// Bit 0 of `flags`: this frame is the last segment of its logical message.
pub const FLAG_IS_LAST: u16 = 1 << 0;

/// Session id reserved for the out-of-band control channel.
pub const CONTROL_SESSION_ID: u16 = 0;

/// Fixed-layout 8-byte frame header, read/written directly from/to the wire.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Header {
    magic: U16<BigEndian>,
    session_id: U16<BigEndian>,
    length: U16<BigEndian>,
    flags: U16<BigEndian>,
}

impl Header {
    pub fn session_id(&self) -> u16 {
        self.session_id.get()
    }

    pub fn length(&self) -> u16 {
        self.length.get()
    }

    pub fn is_last(&self) -> bool {
        self.flags.get() & FLAG_IS_LAST != 0
    }
}

/// A fully decoded frame: header plus its payload bytes.
#[derive(Debug, Clone)]
pub struct Packet {
    pub session_id: u16,
    pub is_last: bool,
    pub payload: Bytes,
}

/// Queued unit of outbound work. The egress writer is responsible for
/// splitting `bytes` across as many frames as `fragment_into_frames`
/// requires; producers never fragment themselves.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub session_id: u16,
    pub is_last: bool,
    pub bytes: Bytes,
}

/// Errors that make the backbone unrecoverable. The receiver treats every
/// variant here as fatal and tears the backbone down.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("bad magic 0x{found:04x}, expected 0x{MAGIC:04x}")]
    BadMagic { found: u16 },
    #[error("payload length {0} exceeds MaxPacketLength ({MAX_PACKET_LENGTH})")]
    PayloadTooLarge(usize),
}

/// Encode one frame (header + payload) into `out`.
///
/// `payload.len()` must not exceed [`MAX_PACKET_LENGTH`]; callers are
/// expected to have already split the logical message via
/// [`fragment_into_packets`].
pub fn encode_frame(out: &mut BytesMut, session_id: u16, is_last: bool, payload: &[u8]) {
    debug_assert!(payload.len() <= MAX_PACKET_LENGTH);
    let flags = if is_last { FLAG_IS_LAST } else { 0 };
    out.put_u16(MAGIC);
    out.put_u16(session_id);
    out.put_u16(payload.len() as u16);
    out.put_u16(flags);
    out.put_slice(payload);
}

/// Try to decode exactly one frame from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` does not yet hold a complete frame. Returns
/// `Err` if the header's magic is wrong, which is a fatal, unrecoverable
/// framing violation per the protocol (peer desync). On success, the
/// consumed bytes (header + payload) are split off the front of `buf`.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Packet>, FramingError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let header = Header::ref_from_bytes(&buf[..HEADER_LEN])
        .expect("slice is exactly HEADER_LEN bytes, matching Header's layout");
    if header.magic.get() != MAGIC {
        return Err(FramingError::BadMagic {
            found: header.magic.get(),
        });
    }
    let length = header.length() as usize;
    if length > MAX_PACKET_LENGTH {
        return Err(FramingError::PayloadTooLarge(length));
    }
    let total = HEADER_LEN + length;
    if buf.len() < total {
        return Ok(None);
    }

    let session_id = header.session_id();
    let is_last = header.is_last();
    let mut frame = buf.split_to(total);
    let payload = frame.split_off(HEADER_LEN).freeze();

    Ok(Some(Packet {
        session_id,
        is_last,
        payload,
    }))
}

/// Split a logical message into one or more already-encoded frames, per the
/// fragmentation contract: every frame but the last carries `IS_LAST =
/// false`; the last carries `is_last`. A zero-length payload with
/// `is_last = true` still yields exactly one header-only frame.
///
/// Each frame is returned as its own buffer (rather than appended to one
/// contiguous buffer) so the egress writer can apply its per-frame write
/// deadline and abandon only the frames after a timeout.
pub fn fragment_into_frames(session_id: u16, is_last: bool, payload: &[u8]) -> Vec<BytesMut> {
    if payload.is_empty() {
        let mut frame = BytesMut::with_capacity(HEADER_LEN);
        encode_frame(&mut frame, session_id, is_last, &[]);
        return vec![frame];
    }
    let mut chunks = payload.chunks(MAX_PACKET_LENGTH).peekable();
    let mut frames = Vec::with_capacity(payload.len().div_ceil(MAX_PACKET_LENGTH));
    while let Some(chunk) = chunks.next() {
        let last_chunk = chunks.peek().is_none();
        let mut frame = BytesMut::with_capacity(HEADER_LEN + chunk.len());
        encode_frame(&mut frame, session_id, last_chunk && is_last, chunk);
        frames.push(frame);
    }
    frames
}

/// Convenience wrapper over [`fragment_into_frames`] that appends every
/// frame to one contiguous buffer; handy for tests and for callers that
/// don't need per-frame write boundaries.
pub fn fragment_into_packets(out: &mut BytesMut, session_id: u16, is_last: bool, payload: &[u8]) {
    for frame in fragment_into_frames(session_id, is_last, payload) {
        out.extend_from_slice(&frame);
    }
}
