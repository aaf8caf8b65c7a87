//! Sequence Number Handling
//!
//! SRT uses 31-bit packet sequence numbers and 26-bit message numbers. Both
//! wrap around; this module provides newtypes whose comparison and arithmetic
//! account for the wrap so buffer and loss-list code never touch raw integers.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Maximum sequence number value (31-bit: 0x7FFFFFFF)
pub const MAX_SEQ_NUMBER: u32 = 0x7FFF_FFFF;

/// Maximum message number value (26-bit)
pub const MAX_MSG_NUMBER: u32 = 0x03FF_FFFF;

/// Sequence number with 31-bit wraparound semantics
///
/// Ordering is only meaningful between numbers less than half the sequence
/// space apart, which is why the type deliberately does not implement `Ord`.
/// Use [`SeqNumber::lt`] and friends instead.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct SeqNumber(u32);

impl SeqNumber {
    /// Create a new sequence number
    ///
    /// # Panics
    /// Panics if value exceeds MAX_SEQ_NUMBER
    pub fn new(value: u32) -> Self {
        assert!(
            value <= MAX_SEQ_NUMBER,
            "Sequence number {} exceeds maximum {}",
            value,
            MAX_SEQ_NUMBER
        );
        SeqNumber(value)
    }

    /// Create a sequence number, masking the value to 31 bits
    #[inline]
    pub fn new_unchecked(value: u32) -> Self {
        SeqNumber(value & MAX_SEQ_NUMBER)
    }

    /// Get the raw sequence number value
    #[inline]
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Increment the sequence number by 1
    #[inline]
    pub fn increment(&mut self) {
        self.0 = (self.0 + 1) & MAX_SEQ_NUMBER;
    }

    /// Get the next sequence number
    #[inline]
    pub fn next(self) -> Self {
        SeqNumber((self.0 + 1) & MAX_SEQ_NUMBER)
    }

    /// Get the previous sequence number
    #[inline]
    pub fn prev(self) -> Self {
        SeqNumber(self.0.wrapping_sub(1) & MAX_SEQ_NUMBER)
    }

    /// Calculate the distance from this sequence number to another
    ///
    /// Returns a signed distance that accounts for wraparound. Positive values
    /// mean `other` is ahead of `self`, negative means `other` is behind.
    pub fn distance_to(self, other: SeqNumber) -> i32 {
        let diff = other.0.wrapping_sub(self.0) as i32;

        // Note: MAX_SEQ_NUMBER + 1 = 0x80000000, which fits in i64
        const WRAP_OFFSET: i64 = (MAX_SEQ_NUMBER as i64) + 1;
        let half_space = MAX_SEQ_NUMBER as i32 / 2;

        if diff > half_space {
            (diff as i64 - WRAP_OFFSET) as i32
        } else if diff < -half_space {
            (diff as i64 + WRAP_OFFSET) as i32
        } else {
            diff
        }
    }

    /// Number of sequence numbers in the inclusive range `[first, last]`
    ///
    /// Zero or negative when `last` precedes `first`.
    #[inline]
    pub fn seqlen(first: SeqNumber, last: SeqNumber) -> i32 {
        first.distance_to(last) + 1
    }

    /// Check if this sequence number is less than another (accounting for wraparound)
    #[inline]
    pub fn lt(self, other: SeqNumber) -> bool {
        self.distance_to(other) > 0
    }

    /// Check if this sequence number is less than or equal to another
    #[inline]
    pub fn le(self, other: SeqNumber) -> bool {
        self == other || self.lt(other)
    }

    /// Check if this sequence number is greater than another
    #[inline]
    pub fn gt(self, other: SeqNumber) -> bool {
        self.distance_to(other) < 0
    }

    /// Check if this sequence number is greater than or equal to another
    #[inline]
    pub fn ge(self, other: SeqNumber) -> bool {
        self == other || self.gt(other)
    }

    /// The later of two sequence numbers
    #[inline]
    pub fn max(self, other: SeqNumber) -> SeqNumber {
        if self.lt(other) {
            other
        } else {
            self
        }
    }
}

impl fmt::Debug for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNumber({})", self.0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl From<u32> for SeqNumber {
    fn from(value: u32) -> Self {
        SeqNumber::new_unchecked(value)
    }
}

impl From<SeqNumber> for u32 {
    fn from(seq: SeqNumber) -> u32 {
        seq.0
    }
}

impl Add<u32> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: u32) -> SeqNumber {
        SeqNumber::new_unchecked(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for SeqNumber {
    fn add_assign(&mut self, rhs: u32) {
        *self = SeqNumber::new_unchecked(self.0.wrapping_add(rhs));
    }
}

impl Sub<u32> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: u32) -> SeqNumber {
        SeqNumber::new_unchecked(self.0.wrapping_sub(rhs))
    }
}

impl SubAssign<u32> for SeqNumber {
    fn sub_assign(&mut self, rhs: u32) {
        *self = SeqNumber::new_unchecked(self.0.wrapping_sub(rhs));
    }
}

impl Sub for SeqNumber {
    type Output = i32;

    /// Calculate the signed distance between two sequence numbers
    fn sub(self, rhs: SeqNumber) -> i32 {
        rhs.distance_to(self)
    }
}

/// Rolling message number
///
/// Message numbers run from 1 to [`MAX_MSG_NUMBER`] and then start over at 1.
/// Zero is reserved for "no message" and is never produced by [`MsgNo::next`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MsgNo(u32);

impl MsgNo {
    /// The first message number of a connection
    pub const FIRST: MsgNo = MsgNo(1);

    /// Wrap an arbitrary value into the valid message number range
    pub fn new(value: u32) -> Self {
        match value & MAX_MSG_NUMBER {
            0 => MsgNo::FIRST,
            v => MsgNo(v),
        }
    }

    #[inline]
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// The message number following this one
    #[inline]
    pub fn next(self) -> Self {
        if self.0 >= MAX_MSG_NUMBER {
            MsgNo::FIRST
        } else {
            MsgNo(self.0 + 1)
        }
    }
}

impl Default for MsgNo {
    fn default() -> Self {
        MsgNo::FIRST
    }
}

impl fmt::Display for MsgNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
