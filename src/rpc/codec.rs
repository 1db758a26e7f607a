// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Protocol V1 packet header: fixed 64-byte on-wire layout, native endianness.
// Byte offsets are chosen for natural alignment of each field, with the
// remainder zero-padded out to HEADER_SIZE.

/// Size in bytes of one wire header. The usable payload per packet is
/// `packet_capacity - HEADER_SIZE`.
pub const HEADER_SIZE: usize = 64;

const OFF_MSG_TYPE: usize = 0;
const OFF_MSG_ID: usize = 8;
const OFF_PAYLOAD_SIZE: usize = 16;
const OFF_CURRENT_PACKET: usize = 20;
const OFF_TOTAL_PACKETS: usize = 22;
const OFF_RESPONSE_ID: usize = 24;

/// One of the three packet kinds carried in a wire header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Request = 1,
    Response = 2,
    Error = 3,
}

impl MsgType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(MsgType::Request),
            2 => Some(MsgType::Response),
            3 => Some(MsgType::Error),
            _ => None,
        }
    }
}

/// A parsed protocol V1 packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub msg_type: MsgType,
    pub msg_id: u64,
    pub payload_size: i32,
    pub current_packet: u16,
    pub total_packets: u16,
    pub response_id: u64,
}

impl PacketHeader {
    /// Encode this header into the fixed 64-byte on-wire layout.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[OFF_MSG_TYPE] = self.msg_type as u8;
        buf[OFF_MSG_ID..OFF_MSG_ID + 8].copy_from_slice(&self.msg_id.to_ne_bytes());
        buf[OFF_PAYLOAD_SIZE..OFF_PAYLOAD_SIZE + 4]
            .copy_from_slice(&self.payload_size.to_ne_bytes());
        buf[OFF_CURRENT_PACKET..OFF_CURRENT_PACKET + 2]
            .copy_from_slice(&self.current_packet.to_ne_bytes());
        buf[OFF_TOTAL_PACKETS..OFF_TOTAL_PACKETS + 2]
            .copy_from_slice(&self.total_packets.to_ne_bytes());
        buf[OFF_RESPONSE_ID..OFF_RESPONSE_ID + 8].copy_from_slice(&self.response_id.to_ne_bytes());
        buf
    }

    /// Parse a header from the first `HEADER_SIZE` bytes of `buf`.
    /// Returns `None` if `buf` is too short or `msg_type` is unrecognized.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let msg_type = MsgType::from_u8(buf[OFF_MSG_TYPE])?;
        let msg_id = u64::from_ne_bytes(buf[OFF_MSG_ID..OFF_MSG_ID + 8].try_into().ok()?);
        let payload_size = i32::from_ne_bytes(
            buf[OFF_PAYLOAD_SIZE..OFF_PAYLOAD_SIZE + 4].try_into().ok()?,
        );
        let current_packet = u16::from_ne_bytes(
            buf[OFF_CURRENT_PACKET..OFF_CURRENT_PACKET + 2]
                .try_into()
                .ok()?,
        );
        let total_packets = u16::from_ne_bytes(
            buf[OFF_TOTAL_PACKETS..OFF_TOTAL_PACKETS + 2]
                .try_into()
                .ok()?,
        );
        let response_id =
            u64::from_ne_bytes(buf[OFF_RESPONSE_ID..OFF_RESPONSE_ID + 8].try_into().ok()?);
        Some(Self {
            msg_type,
            msg_id,
            payload_size,
            current_packet,
            total_packets,
            response_id,
        })
    }
}

/// Number of packets needed to carry `payload_len` bytes of at most
/// `msg_buffer_length` bytes each. Empty payloads still need one packet.
pub fn total_packets_for(payload_len: usize, msg_buffer_length: usize) -> u16 {
    if payload_len == 0 {
        return 1;
    }
    let n = payload_len.div_ceil(msg_buffer_length);
    n as u16
}

/// Bytes carried by packet `current_packet` (1-indexed) of `total_packets`,
/// given the full `payload_size` and per-packet capacity `msg_buffer_length`.
///
/// The last packet's size is the remainder of `payload_size` after the
/// preceding `total_packets - 1` full packets — *not* a naive modulo, which
/// would incorrectly yield 0 when `payload_size` is an exact multiple of
/// `msg_buffer_length`.
pub fn packet_size_for(
    payload_size: u32,
    current_packet: u16,
    total_packets: u16,
    msg_buffer_length: usize,
) -> usize {
    if (payload_size as usize) < msg_buffer_length {
        return payload_size as usize;
    }
    if current_packet < total_packets {
        return msg_buffer_length;
    }
    payload_size as usize - msg_buffer_length * (total_packets as usize - 1)
}
