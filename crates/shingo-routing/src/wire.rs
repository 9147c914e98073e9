//! Control message wire format
//!
//! Four fixed-layout records travel on the control port, all integers
//! big-endian:
//!
//! | Message            | Size | Layout                                                        |
//! |--------------------|------|---------------------------------------------------------------|
//! | Zone update record | 12   | dst(4) hop(4) dst_seq(4)                                      |
//! | Route request      | 23   | flags(1) reserved(1) hop(1) id(4) dst(4) dst_seq(4) orig(4) orig_seq(4) |
//! | Route reply        | 19   | flags(1) prefix(1) hop(1) dst(4) dst_seq(4) orig(4) lifetime_ms(4) |
//! | Reply ack          | 1    | reserved(1)                                                   |
//!
//! A zone update datagram is a batch of records. With [`WireFraming::Tagged`]
//! every datagram starts with a one-byte [`MessageType`]; with
//! [`WireFraming::Legacy`] the kind is inferred from the datagram length.

use std::net::Ipv4Addr;
use std::time::Duration;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::WireError;

/// Size of one zone update record
pub const IARP_RECORD_SIZE: usize = 12;
/// Size of a route request
pub const RREQ_SIZE: usize = 23;
/// Size of a route reply
pub const RREP_SIZE: usize = 19;
/// Size of a reply acknowledgment
pub const RREP_ACK_SIZE: usize = 1;

/// How the message kind is conveyed on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireFraming {
    /// One-byte discriminant before the record(s)
    #[default]
    Tagged,
    /// Kind inferred from the datagram length
    Legacy,
}

/// Discriminant used by tagged framing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Iarp = 1,
    Rreq = 2,
    Rrep = 3,
    RrepAck = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Iarp),
            2 => Ok(Self::Rreq),
            3 => Ok(Self::Rrep),
            4 => Ok(Self::RrepAck),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

bitflags! {
    /// Route request flags
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct RreqFlags: u8 {
        /// Intermediate repliers also inform the destination
        const GRATUITOUS_REPLY = 0b0010_0000;
        /// Only the destination may reply
        const DESTINATION_ONLY = 0b0001_0000;
        /// The origin knows no sequence number for the destination
        const UNKNOWN_SEQ = 0b0000_1000;
    }
}

bitflags! {
    /// Route reply flags
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct RrepFlags: u8 {
        /// The receiver must answer with a reply acknowledgment
        const ACK_REQUIRED = 0b0100_0000;
    }
}

/// One destination advertised by a zone update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IarpRecord {
    pub destination: Ipv4Addr,
    pub hop_count: u32,
    pub seq: u32,
}

impl IarpRecord {
    pub fn new(destination: Ipv4Addr, hop_count: u32, seq: u32) -> Self {
        Self {
            destination,
            hop_count,
            seq,
        }
    }

    /// Odd sequence numbers mark an unreachable destination
    pub fn is_infinite_metric(&self) -> bool {
        self.seq % 2 == 1
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32(self.destination.into());
        buf.put_u32(self.hop_count);
        buf.put_u32(self.seq);
    }

    fn read(mut buf: &[u8]) -> Result<Self, WireError> {
        check_len("zone update", IARP_RECORD_SIZE, buf.len())?;
        Ok(Self {
            destination: Ipv4Addr::from(buf.get_u32()),
            hop_count: buf.get_u32(),
            seq: buf.get_u32(),
        })
    }
}

/// Route request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRequest {
    pub flags: RreqFlags,
    pub hop_count: u8,
    pub request_id: u32,
    pub destination: Ipv4Addr,
    pub dst_seq: u32,
    pub origin: Ipv4Addr,
    pub origin_seq: u32,
}

impl RouteRequest {
    pub fn gratuitous_reply(&self) -> bool {
        self.flags.contains(RreqFlags::GRATUITOUS_REPLY)
    }

    pub fn destination_only(&self) -> bool {
        self.flags.contains(RreqFlags::DESTINATION_ONLY)
    }

    pub fn unknown_seq(&self) -> bool {
        self.flags.contains(RreqFlags::UNKNOWN_SEQ)
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags.bits());
        buf.put_u8(0);
        buf.put_u8(self.hop_count);
        buf.put_u32(self.request_id);
        buf.put_u32(self.destination.into());
        buf.put_u32(self.dst_seq);
        buf.put_u32(self.origin.into());
        buf.put_u32(self.origin_seq);
    }

    fn read(mut buf: &[u8]) -> Result<Self, WireError> {
        check_len("route request", RREQ_SIZE, buf.len())?;
        let flags = RreqFlags::from_bits_retain(buf.get_u8());
        let _reserved = buf.get_u8();
        Ok(Self {
            flags,
            hop_count: buf.get_u8(),
            request_id: buf.get_u32(),
            destination: Ipv4Addr::from(buf.get_u32()),
            dst_seq: buf.get_u32(),
            origin: Ipv4Addr::from(buf.get_u32()),
            origin_seq: buf.get_u32(),
        })
    }
}

/// Route reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteReply {
    pub flags: RrepFlags,
    pub prefix_size: u8,
    pub hop_count: u8,
    pub destination: Ipv4Addr,
    pub dst_seq: u32,
    pub origin: Ipv4Addr,
    /// Millisecond resolution on the wire
    pub lifetime: Duration,
}

impl RouteReply {
    pub fn ack_required(&self) -> bool {
        self.flags.contains(RrepFlags::ACK_REQUIRED)
    }

    pub fn set_ack_required(&mut self, required: bool) {
        self.flags.set(RrepFlags::ACK_REQUIRED, required);
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags.bits());
        buf.put_u8(self.prefix_size);
        buf.put_u8(self.hop_count);
        buf.put_u32(self.destination.into());
        buf.put_u32(self.dst_seq);
        buf.put_u32(self.origin.into());
        buf.put_u32(u32::try_from(self.lifetime.as_millis()).unwrap_or(u32::MAX));
    }

    fn read(mut buf: &[u8]) -> Result<Self, WireError> {
        check_len("route reply", RREP_SIZE, buf.len())?;
        Ok(Self {
            flags: RrepFlags::from_bits_retain(buf.get_u8()),
            prefix_size: buf.get_u8(),
            hop_count: buf.get_u8(),
            destination: Ipv4Addr::from(buf.get_u32()),
            dst_seq: buf.get_u32(),
            origin: Ipv4Addr::from(buf.get_u32()),
            lifetime: Duration::from_millis(u64::from(buf.get_u32())),
        })
    }
}

/// A decoded control datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Batch of zone update records
    Iarp(Vec<IarpRecord>),
    Request(RouteRequest),
    Reply(RouteReply),
    ReplyAck,
}

impl ControlMessage {
    /// Tagged discriminant of this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Iarp(_) => MessageType::Iarp,
            Self::Request(_) => MessageType::Rreq,
            Self::Reply(_) => MessageType::Rrep,
            Self::ReplyAck => MessageType::RrepAck,
        }
    }

    /// Encode into a datagram
    pub fn encode(&self, framing: WireFraming) -> Bytes {
        let body = match self {
            Self::Iarp(records) => records.len() * IARP_RECORD_SIZE,
            Self::Request(_) => RREQ_SIZE,
            Self::Reply(_) => RREP_SIZE,
            Self::ReplyAck => RREP_ACK_SIZE,
        };
        let mut buf = BytesMut::with_capacity(body + 1);
        if framing == WireFraming::Tagged {
            buf.put_u8(self.message_type() as u8);
        }
        match self {
            Self::Iarp(records) => records.iter().for_each(|r| r.write(&mut buf)),
            Self::Request(rreq) => rreq.write(&mut buf),
            Self::Reply(rrep) => rrep.write(&mut buf),
            Self::ReplyAck => buf.put_u8(0),
        }
        buf.freeze()
    }

    /// Decode a datagram
    ///
    /// A trailing partial record in a zone update batch is discarded; the
    /// complete records before it are kept.
    pub fn decode(datagram: &[u8], framing: WireFraming) -> Result<Self, WireError> {
        let (kind, body) = match framing {
            WireFraming::Tagged => {
                let (&tag, body) = datagram.split_first().ok_or(WireError::Empty)?;
                (MessageType::try_from(tag)?, body)
            }
            WireFraming::Legacy => (infer_legacy_type(datagram.len()), datagram),
        };

        match kind {
            MessageType::Iarp => Ok(Self::Iarp(decode_iarp_batch(body))),
            MessageType::Rreq => {
                let rreq = RouteRequest::read(prefix(body, RREQ_SIZE, framing, "route request")?)?;
                Ok(Self::Request(rreq))
            }
            MessageType::Rrep => {
                let rrep = RouteReply::read(prefix(body, RREP_SIZE, framing, "route reply")?)?;
                Ok(Self::Reply(rrep))
            }
            MessageType::RrepAck => {
                if framing == WireFraming::Tagged && body.len() != RREP_ACK_SIZE {
                    return Err(WireError::MalformedRecord {
                        kind: "reply ack",
                        expected: RREP_ACK_SIZE,
                        actual: body.len(),
                    });
                }
                Ok(Self::ReplyAck)
            }
        }
    }
}

/// Length-based classification of untagged datagrams
pub fn infer_legacy_type(len: usize) -> MessageType {
    if len % IARP_RECORD_SIZE == 0 {
        MessageType::Iarp
    } else if len % RREQ_SIZE == 0 {
        MessageType::Rreq
    } else if len % RREP_SIZE == 0 {
        MessageType::Rrep
    } else {
        MessageType::RrepAck
    }
}

fn decode_iarp_batch(body: &[u8]) -> Vec<IarpRecord> {
    let mut records = Vec::with_capacity(body.len() / IARP_RECORD_SIZE);
    for chunk in body.chunks(IARP_RECORD_SIZE) {
        match IarpRecord::read(chunk) {
            Ok(record) => records.push(record),
            Err(e) => warn!(error = %e, "Discarding zone update record"),
        }
    }
    records
}

/// Tagged bodies must match the layout exactly; legacy bodies are read
/// from their first record.
fn prefix<'a>(
    body: &'a [u8],
    size: usize,
    framing: WireFraming,
    kind: &'static str,
) -> Result<&'a [u8], WireError> {
    match framing {
        WireFraming::Tagged if body.len() > size => Err(WireError::MalformedRecord {
            kind,
            expected: size,
            actual: body.len(),
        }),
        _ => Ok(&body[..size.min(body.len())]),
    }
}

fn check_len(kind: &'static str, expected: usize, actual: usize) -> Result<(), WireError> {
    if actual < expected {
        Err(WireError::Truncated {
            kind,
            expected,
            actual,
        })
    } else if actual > expected {
        Err(WireError::MalformedRecord {
            kind,
            expected,
            actual,
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_rreq() -> RouteRequest {
        RouteRequest {
            flags: RreqFlags::GRATUITOUS_REPLY | RreqFlags::UNKNOWN_SEQ,
            hop_count: 3,
            request_id: 0xdead_beef,
            destination: Ipv4Addr::new(10, 0, 0, 9),
            dst_seq: 0,
            origin: Ipv4Addr::new(10, 0, 0, 1),
            origin_seq: 42,
        }
    }

    fn make_rrep() -> RouteReply {
        RouteReply {
            flags: RrepFlags::ACK_REQUIRED,
            prefix_size: 0,
            hop_count: 2,
            destination: Ipv4Addr::new(10, 0, 0, 9),
            dst_seq: 6,
            origin: Ipv4Addr::new(10, 0, 0, 1),
            lifetime: Duration::from_millis(11_200),
        }
    }

    #[test]
    fn test_record_sizes() {
        let rreq = ControlMessage::Request(make_rreq()).encode(WireFraming::Legacy);
        let rrep = ControlMessage::Reply(make_rrep()).encode(WireFraming::Legacy);
        let ack = ControlMessage::ReplyAck.encode(WireFraming::Legacy);
        let batch = ControlMessage::Iarp(vec![IarpRecord::new(Ipv4Addr::new(10, 0, 0, 2), 1, 4); 3])
            .encode(WireFraming::Legacy);

        assert_eq!(rreq.len(), RREQ_SIZE);
        assert_eq!(rrep.len(), RREP_SIZE);
        assert_eq!(ack.len(), RREP_ACK_SIZE);
        assert_eq!(batch.len(), 3 * IARP_RECORD_SIZE);
    }

    #[test]
    fn test_request_byte_layout() {
        let bytes = ControlMessage::Request(make_rreq()).encode(WireFraming::Legacy);
        assert_eq!(bytes[0], 0b0010_1000);
        assert_eq!(bytes[1], 0);
        assert_eq!(bytes[2], 3);
        assert_eq!(&bytes[3..7], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&bytes[7..11], &[10, 0, 0, 9]);
        assert_eq!(&bytes[19..23], &[0, 0, 0, 42]);
    }

    #[test]
    fn test_reply_lifetime_in_millis() {
        let bytes = ControlMessage::Reply(make_rrep()).encode(WireFraming::Legacy);
        assert_eq!(bytes[0], 0b0100_0000);
        assert_eq!(&bytes[15..19], &11_200u32.to_be_bytes());
    }

    #[test]
    fn test_tagged_round_trip() {
        let messages = [
            ControlMessage::Iarp(vec![
                IarpRecord::new(Ipv4Addr::new(10, 0, 0, 2), 1, 4),
                IarpRecord::new(Ipv4Addr::new(10, 0, 0, 3), 2, 7),
            ]),
            ControlMessage::Request(make_rreq()),
            ControlMessage::Reply(make_rrep()),
            ControlMessage::ReplyAck,
        ];
        for message in messages {
            let bytes = message.encode(WireFraming::Tagged);
            assert_eq!(bytes[0], message.message_type() as u8);
            let decoded = ControlMessage::decode(&bytes, WireFraming::Tagged).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_legacy_length_inference() {
        assert_eq!(infer_legacy_type(0), MessageType::Iarp);
        assert_eq!(infer_legacy_type(24), MessageType::Iarp);
        assert_eq!(infer_legacy_type(23), MessageType::Rreq);
        assert_eq!(infer_legacy_type(46), MessageType::Rreq);
        assert_eq!(infer_legacy_type(19), MessageType::Rrep);
        assert_eq!(infer_legacy_type(1), MessageType::RrepAck);
        assert_eq!(infer_legacy_type(5), MessageType::RrepAck);
        // 36 is a multiple of 12 before it is anything else
        assert_eq!(infer_legacy_type(36), MessageType::Iarp);
    }

    #[test]
    fn test_legacy_decode() {
        let rreq = make_rreq();
        let bytes = ControlMessage::Request(rreq).encode(WireFraming::Legacy);
        assert_eq!(
            ControlMessage::decode(&bytes, WireFraming::Legacy).unwrap(),
            ControlMessage::Request(rreq)
        );
    }

    #[test]
    fn test_unknown_discriminant() {
        assert_eq!(
            ControlMessage::decode(&[9, 0], WireFraming::Tagged),
            Err(WireError::UnknownMessageType(9))
        );
        assert_eq!(ControlMessage::decode(&[], WireFraming::Tagged), Err(WireError::Empty));
    }

    #[test]
    fn test_truncated_request() {
        let bytes = ControlMessage::Request(make_rreq()).encode(WireFraming::Tagged);
        let err = ControlMessage::decode(&bytes[..10], WireFraming::Tagged).unwrap_err();
        assert!(matches!(err, WireError::Truncated { expected: RREQ_SIZE, .. }));
    }

    #[test]
    fn test_batch_keeps_complete_records() {
        let mut bytes = ControlMessage::Iarp(vec![IarpRecord::new(Ipv4Addr::new(10, 0, 0, 2), 1, 4)])
            .encode(WireFraming::Tagged)
            .to_vec();
        bytes.extend_from_slice(&[1, 2, 3]);

        let decoded = ControlMessage::decode(&bytes, WireFraming::Tagged).unwrap();
        assert_eq!(
            decoded,
            ControlMessage::Iarp(vec![IarpRecord::new(Ipv4Addr::new(10, 0, 0, 2), 1, 4)])
        );
    }

    #[test]
    fn test_flag_bits_preserved() {
        let flags = RreqFlags::from_bits_retain(0xff);
        assert!(flags.contains(RreqFlags::DESTINATION_ONLY));
        assert_eq!(flags.bits(), 0xff);
    }
}
