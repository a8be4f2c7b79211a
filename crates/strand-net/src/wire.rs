//! Wire-format definitions for fabric packets.
//!
//! Every frame starts with a shared header prefix; its one-byte protocol
//! discriminant selects the datagram or stream layout. No I/O happens here,
//! this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//! shared prefix (21 bytes):
//!   proto(1) | src addr(8) | src port(2) | dst addr(8) | dst port(2)
//! stream suffix (9 bytes):
//!   msg type(1) | seq(4) | ack(4)
//! ```
//!
//! Datagram frames carry payload straight after the shared prefix; stream
//! frames after the suffix.

use core::fmt;

use strand_core::constants::MAX_PACKET_SIZE;

use crate::addr::{Endpoint, NetAddr};

/// Byte length of the shared header prefix
pub const SHARED_HEADER_LEN: usize = 21;

/// Byte length of a full stream header
pub const STREAM_HEADER_LEN: usize = 30;

/// Largest payload a single datagram frame can carry
pub const MAX_DATAGRAM_PAYLOAD: usize = MAX_PACKET_SIZE - SHARED_HEADER_LEN;

/// Largest payload a single stream segment can carry
pub const MAX_STREAM_PAYLOAD: usize = MAX_PACKET_SIZE - STREAM_HEADER_LEN;

// Byte offsets within the serialized header
const OFF_PROTO: usize = 0;
const OFF_SRC_ADDR: usize = 1;
const OFF_SRC_PORT: usize = 9;
const OFF_DST_ADDR: usize = 11;
const OFF_DST_PORT: usize = 19;
const OFF_MSG_TYPE: usize = 21;
const OFF_SEQ: usize = 22;
const OFF_ACK: usize = 26;

/// Protocol discriminant in the shared prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Datagram = 1,
    Stream = 2,
}

/// Stream message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    Syn = 1,
    SynAck = 2,
    Ack = 3,
    Fin = 4,
    FinAck = 5,
}

impl MsgType {
    fn from_u8(v: u8) -> Option<MsgType> {
        match v {
            1 => Some(MsgType::Syn),
            2 => Some(MsgType::SynAck),
            3 => Some(MsgType::Ack),
            4 => Some(MsgType::Fin),
            5 => Some(MsgType::FinAck),
            _ => None,
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MsgType::Syn => "SYN",
            MsgType::SynAck => "SYN-ACK",
            MsgType::Ack => "ACK",
            MsgType::Fin => "FIN",
            MsgType::FinAck => "FIN-ACK",
        };
        write!(f, "{}", s)
    }
}

/// Header of an unreliable datagram frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    pub src: Endpoint,
    pub dst: Endpoint,
}

/// Header of a reliable stream segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub src: Endpoint,
    pub dst: Endpoint,
    pub msg_type: MsgType,
    pub seq: u32,
    pub ack: u32,
}

fn put_shared(buf: &mut [u8], proto: Protocol, src: Endpoint, dst: Endpoint) {
    buf[OFF_PROTO] = proto as u8;
    buf[OFF_SRC_ADDR..OFF_SRC_ADDR + 8].copy_from_slice(&src.addr.to_bytes());
    buf[OFF_SRC_PORT..OFF_SRC_PORT + 2].copy_from_slice(&src.port.to_be_bytes());
    buf[OFF_DST_ADDR..OFF_DST_ADDR + 8].copy_from_slice(&dst.addr.to_bytes());
    buf[OFF_DST_PORT..OFF_DST_PORT + 2].copy_from_slice(&dst.port.to_be_bytes());
}

fn get_shared(buf: &[u8]) -> (Endpoint, Endpoint) {
    let src_addr = NetAddr::from_bytes(buf[OFF_SRC_ADDR..OFF_SRC_ADDR + 8].try_into().unwrap());
    let src_port = u16::from_be_bytes(buf[OFF_SRC_PORT..OFF_SRC_PORT + 2].try_into().unwrap());
    let dst_addr = NetAddr::from_bytes(buf[OFF_DST_ADDR..OFF_DST_ADDR + 8].try_into().unwrap());
    let dst_port = u16::from_be_bytes(buf[OFF_DST_PORT..OFF_DST_PORT + 2].try_into().unwrap());
    (
        Endpoint::new(src_addr, src_port),
        Endpoint::new(dst_addr, dst_port),
    )
}

impl DatagramHeader {
    /// Serialize into the fixed-size header bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SHARED_HEADER_LEN];
        put_shared(&mut buf, Protocol::Datagram, self.src, self.dst);
        buf
    }
}

impl StreamHeader {
    /// Serialize into the fixed-size header bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; STREAM_HEADER_LEN];
        put_shared(&mut buf, Protocol::Stream, self.src, self.dst);
        buf[OFF_MSG_TYPE] = self.msg_type as u8;
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        buf
    }
}

/// A decoded frame header; the payload starts at `header_len()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    Datagram(DatagramHeader),
    Stream(StreamHeader),
}

impl Header {
    pub fn header_len(&self) -> usize {
        match self {
            Header::Datagram(_) => SHARED_HEADER_LEN,
            Header::Stream(_) => STREAM_HEADER_LEN,
        }
    }
}

/// Errors that can arise when parsing a raw frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Frame shorter than its fixed header
    TooShort,
    /// Unknown protocol discriminant
    UnknownProtocol(u8),
    /// Unknown stream message type
    UnknownMsgType(u8),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::TooShort => write!(f, "frame too short for its header"),
            WireError::UnknownProtocol(p) => write!(f, "unknown protocol discriminant {}", p),
            WireError::UnknownMsgType(t) => write!(f, "unknown stream message type {}", t),
        }
    }
}

impl std::error::Error for WireError {}

/// Parse a frame's header from raw bytes
pub fn decode(buf: &[u8]) -> Result<Header, WireError> {
    if buf.len() < SHARED_HEADER_LEN {
        return Err(WireError::TooShort);
    }
    match buf[OFF_PROTO] {
        p if p == Protocol::Datagram as u8 => {
            let (src, dst) = get_shared(buf);
            Ok(Header::Datagram(DatagramHeader { src, dst }))
        }
        p if p == Protocol::Stream as u8 => {
            if buf.len() < STREAM_HEADER_LEN {
                return Err(WireError::TooShort);
            }
            let (src, dst) = get_shared(buf);
            let msg_type = MsgType::from_u8(buf[OFF_MSG_TYPE])
                .ok_or(WireError::UnknownMsgType(buf[OFF_MSG_TYPE]))?;
            let seq = u32::from_be_bytes(buf[OFF_SEQ..OFF_SEQ + 4].try_into().unwrap());
            let ack = u32::from_be_bytes(buf[OFF_ACK..OFF_ACK + 4].try_into().unwrap());
            Ok(Header::Stream(StreamHeader {
                src,
                dst,
                msg_type,
                seq,
                ack,
            }))
        }
        p => Err(WireError::UnknownProtocol(p)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(addr: u64, port: u16) -> Endpoint {
        Endpoint::new(NetAddr::new(addr), port)
    }

    #[test]
    fn test_stream_roundtrip() {
        let hdr = StreamHeader {
            src: ep(1, 40000),
            dst: ep(2, 80),
            msg_type: MsgType::Ack,
            seq: 7,
            ack: 3,
        };
        let bytes = hdr.encode();
        assert_eq!(bytes.len(), STREAM_HEADER_LEN);
        assert_eq!(decode(&bytes).unwrap(), Header::Stream(hdr));
    }

    #[test]
    fn test_datagram_roundtrip() {
        let hdr = DatagramHeader {
            src: ep(9, 33000),
            dst: ep(4, 100),
        };
        let bytes = hdr.encode();
        assert_eq!(bytes.len(), SHARED_HEADER_LEN);
        assert_eq!(decode(&bytes).unwrap(), Header::Datagram(hdr));
    }

    #[test]
    fn test_big_endian_on_wire() {
        let hdr = StreamHeader {
            src: ep(0x0102_0304_0506_0708, 0x0a0b),
            dst: ep(0, 0),
            msg_type: MsgType::Syn,
            seq: 0x1122_3344,
            ack: 0,
        };
        let bytes = hdr.encode();
        assert_eq!(&bytes[1..9], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&bytes[9..11], &[0x0a, 0x0b]);
        assert_eq!(&bytes[22..26], &[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_short_frames_rejected() {
        assert_eq!(decode(&[]), Err(WireError::TooShort));
        assert_eq!(decode(&[0u8; SHARED_HEADER_LEN - 1]), Err(WireError::TooShort));

        // A stream frame cut off after the shared prefix
        let hdr = StreamHeader {
            src: ep(1, 1),
            dst: ep(2, 2),
            msg_type: MsgType::Syn,
            seq: 0,
            ack: 0,
        };
        let bytes = hdr.encode();
        assert_eq!(decode(&bytes[..SHARED_HEADER_LEN]), Err(WireError::TooShort));
    }

    #[test]
    fn test_unknown_discriminants_rejected() {
        let hdr = DatagramHeader {
            src: ep(1, 1),
            dst: ep(2, 2),
        };
        let mut bytes = hdr.encode();
        bytes[0] = 9;
        assert_eq!(decode(&bytes), Err(WireError::UnknownProtocol(9)));

        let shdr = StreamHeader {
            src: ep(1, 1),
            dst: ep(2, 2),
            msg_type: MsgType::Fin,
            seq: 0,
            ack: 0,
        };
        let mut bytes = shdr.encode();
        bytes[21] = 77;
        assert_eq!(decode(&bytes), Err(WireError::UnknownMsgType(77)));
    }
}
