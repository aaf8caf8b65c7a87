//! Loss list tracking for SRT
//!
//! The sender keeps the sequence ranges reported lost by the peer until they
//! are retransmitted; the receiver keeps the ranges it has not received yet
//! so it can build loss reports. Both lists store ranges in a fixed array
//! where a range starting at sequence `s` lives at position
//! `(head + offset(head_start, s)) % size`, linked in sequence order.

mod fresh;
mod receiver;
mod sender;

pub use fresh::{FreshLoss, FreshLossList, Revoke};
pub use receiver::RecvLossList;
pub use sender::SendLossList;

use crate::sequence::SeqNumber;

/// Flag marking the first element of a range in an encoded loss array
pub const LOSS_RANGE_FIRST: u32 = 0x8000_0000;

/// Loss sequence range (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LossRange {
    /// First sequence number in range
    pub start: SeqNumber,
    /// Last sequence number in range (inclusive)
    pub end: SeqNumber,
}

impl LossRange {
    /// Create a new loss range
    pub fn new(start: SeqNumber, end: SeqNumber) -> Self {
        LossRange { start, end }
    }

    /// Create a single-packet loss range
    pub fn single(seq: SeqNumber) -> Self {
        LossRange {
            start: seq,
            end: seq,
        }
    }

    /// Check if this range contains a sequence number
    pub fn contains(&self, seq: SeqNumber) -> bool {
        seq.ge(self.start) && seq.le(self.end)
    }

    /// Get the length of this range
    pub fn len(&self) -> usize {
        SeqNumber::seqlen(self.start, self.end).max(0) as usize
    }

    /// Check if this is a single packet
    pub fn is_single(&self) -> bool {
        self.start == self.end
    }
}

/// Decode a loss array produced by [`RecvLossList::loss_array`]
pub fn decode_loss_array(array: &[u32]) -> Vec<LossRange> {
    let mut ranges = Vec::new();
    let mut iter = array.iter();
    while let Some(&value) = iter.next() {
        let start = SeqNumber::new_unchecked(value);
        if value & LOSS_RANGE_FIRST != 0 {
            match iter.next() {
                Some(&end) => ranges.push(LossRange::new(start, SeqNumber::new_unchecked(end))),
                None => ranges.push(LossRange::single(start)),
            }
        } else {
            ranges.push(LossRange::single(start));
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_range_len() {
        let r = LossRange::new(SeqNumber::new(10), SeqNumber::new(15));
        assert_eq!(r.len(), 6);
        assert!(r.contains(SeqNumber::new(15)));
        assert!(!r.contains(SeqNumber::new(16)));
        assert_eq!(LossRange::single(SeqNumber::new(3)).len(), 1);
    }

    #[test]
    fn test_decode_loss_array() {
        let array = [5, 10 | LOSS_RANGE_FIRST, 12, 20];
        assert_eq!(
            decode_loss_array(&array),
            vec![
                LossRange::single(SeqNumber::new(5)),
                LossRange::new(SeqNumber::new(10), SeqNumber::new(12)),
                LossRange::single(SeqNumber::new(20)),
            ]
        );
    }
}
