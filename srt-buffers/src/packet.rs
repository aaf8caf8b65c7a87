//! Data packet fields carried through the buffers
//!
//! The buffers never serialize packets. They store the payload together with
//! the header fields the transport layer needs to emit it again unchanged:
//! the sequence number, the message-number bitfield and the timestamp.

use crate::sequence::SeqNumber;
use bytes::BytesMut;
use std::fmt;

/// Maximum payload size for SRT packet (MTU 1500 - IP/UDP headers - SRT header)
pub const MAX_PAYLOAD_SIZE: usize = 1456; // 1500 - 28 (IP+UDP) - 16 (SRT header)

/// Per-packet overhead added to payload bytes when estimating the input rate
pub const DATA_HEADER_OVERHEAD: usize = 44; // 28 (IP+UDP) + 16 (SRT header)

/// Maximum timestamp value (32-bit)
pub const MAX_TIMESTAMP: u32 = 0xFFFF_FFFF;

/// Message sequence bits when the retransmitted flag is in use
const MSGNO_SEQ_MASK: u32 = 0x03FF_FFFF;

/// Message sequence bits when bit 26 is not reserved for the retransmitted flag
const MSGNO_SEQ_OLD_MASK: u32 = 0x07FF_FFFF;

/// Message boundary flags (bits 30-31 of message number field)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketBoundary {
    /// Packet in the middle of a message
    Subsequent = 0b00,
    /// Last packet of a message
    Last = 0b01,
    /// First packet of a message
    First = 0b10,
    /// Solo packet (complete message)
    Solo = 0b11,
}

impl PacketBoundary {
    pub fn from_bits(value: u8) -> Self {
        match value & 0b11 {
            0b00 => PacketBoundary::Subsequent,
            0b01 => PacketBoundary::Last,
            0b10 => PacketBoundary::First,
            _ => PacketBoundary::Solo,
        }
    }

    /// Boundary of segment `index` in a message of `count` segments
    pub fn for_segment(index: usize, count: usize) -> Self {
        let first = if index == 0 { 0b10 } else { 0 };
        let last = if index + 1 == count { 0b01 } else { 0 };
        PacketBoundary::from_bits(first | last)
    }

    pub fn as_bits(self) -> u8 {
        self as u8
    }

    /// Whether this packet opens a message (First or Solo)
    #[inline]
    pub fn is_first(self) -> bool {
        self.as_bits() & 0b10 != 0
    }

    /// Whether this packet closes a message (Last or Solo)
    #[inline]
    pub fn is_last(self) -> bool {
        self.as_bits() & 0b01 != 0
    }
}

/// Encryption key specification (bits 27-28 of message number field)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EncryptionKeySpec {
    /// No encryption
    None = 0,
    /// Even key
    Even = 1,
    /// Odd key
    Odd = 2,
}

impl EncryptionKeySpec {
    pub fn from_bits(value: u8) -> Self {
        match value & 0b11 {
            1 => EncryptionKeySpec::Even,
            2 => EncryptionKeySpec::Odd,
            _ => EncryptionKeySpec::None,
        }
    }

    pub fn as_bits(self) -> u8 {
        self as u8
    }
}

/// Message number and flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgNumber {
    /// Message boundary (bits 30-31)
    pub boundary: PacketBoundary,
    /// In-order delivery flag (bit 29)
    pub in_order: bool,
    /// Encryption key spec (bits 27-28)
    pub encryption_key: EncryptionKeySpec,
    /// Retransmission flag (bit 26)
    pub retransmitted: bool,
    /// Message sequence number (bits 0-25)
    pub seq: u32,
}

impl MsgNumber {
    /// Create a solo, unencrypted message number
    pub fn new(seq: u32) -> Self {
        MsgNumber {
            boundary: PacketBoundary::Solo,
            in_order: false,
            encryption_key: EncryptionKeySpec::None,
            retransmitted: false,
            seq: seq & MSGNO_SEQ_MASK,
        }
    }

    /// Parse message number from raw 32-bit value
    pub fn from_raw(raw: u32) -> Self {
        MsgNumber {
            boundary: PacketBoundary::from_bits(((raw >> 30) & 0b11) as u8),
            in_order: (raw & (1 << 29)) != 0,
            encryption_key: EncryptionKeySpec::from_bits(((raw >> 27) & 0b11) as u8),
            retransmitted: (raw & (1 << 26)) != 0,
            seq: raw & MSGNO_SEQ_MASK,
        }
    }

    /// Convert to raw 32-bit value
    pub fn to_raw(self) -> u32 {
        let mut raw = self.seq & MSGNO_SEQ_MASK;
        raw |= (self.boundary.as_bits() as u32) << 30;
        if self.in_order {
            raw |= 1 << 29;
        }
        raw |= (self.encryption_key.as_bits() as u32) << 27;
        if self.retransmitted {
            raw |= 1 << 26;
        }
        raw
    }

    /// Message sequence as seen by a peer
    ///
    /// Peers that do not use the retransmitted flag treat bit 26 as part of
    /// the message number.
    pub fn seq_with(self, rexmit_flag_used: bool) -> u32 {
        if rexmit_flag_used {
            self.seq
        } else {
            self.to_raw() & MSGNO_SEQ_OLD_MASK
        }
    }
}

/// A received data packet as stored in a receive unit
#[derive(Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub seq: SeqNumber,
    pub msg: MsgNumber,
    /// Sender timestamp in microseconds, wrapping at [`MAX_TIMESTAMP`]
    pub timestamp: u32,
    pub payload: BytesMut,
}

impl DataPacket {
    pub fn new(seq: SeqNumber, msg: MsgNumber, timestamp: u32, payload: &[u8]) -> Self {
        DataPacket {
            seq,
            msg,
            timestamp,
            payload: BytesMut::from(payload),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Debug for DataPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPacket")
            .field("seq", &self.seq)
            .field("msg", &self.msg)
            .field("timestamp", &self.timestamp)
            .field("len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_for_segment() {
        assert_eq!(PacketBoundary::for_segment(0, 1), PacketBoundary::Solo);
        assert_eq!(PacketBoundary::for_segment(0, 3), PacketBoundary::First);
        assert_eq!(PacketBoundary::for_segment(1, 3), PacketBoundary::Subsequent);
        assert_eq!(PacketBoundary::for_segment(2, 3), PacketBoundary::Last);
    }

    #[test]
    fn test_boundary_flags() {
        assert!(PacketBoundary::Solo.is_first() && PacketBoundary::Solo.is_last());
        assert!(PacketBoundary::First.is_first() && !PacketBoundary::First.is_last());
        assert!(!PacketBoundary::Subsequent.is_first());
    }

    #[test]
    fn test_msg_number_bits() {
        let msg = MsgNumber {
            boundary: PacketBoundary::First,
            in_order: true,
            encryption_key: EncryptionKeySpec::Odd,
            retransmitted: true,
            seq: 12345,
        };
        let raw = msg.to_raw();
        assert_eq!(raw >> 30, 0b10);
        assert_ne!(raw & (1 << 29), 0);
        assert_eq!((raw >> 27) & 0b11, 2);
        assert_ne!(raw & (1 << 26), 0);
        assert_eq!(MsgNumber::from_raw(raw), msg);
    }

    #[test]
    fn test_seq_with_rexmit_flag() {
        let mut msg = MsgNumber::new(7);
        msg.retransmitted = true;
        assert_eq!(msg.seq_with(true), 7);
        assert_eq!(msg.seq_with(false), 7 | (1 << 26));
    }
}
