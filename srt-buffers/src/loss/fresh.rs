//! Fresh loss tracking
//!
//! A gap that was just detected may still be filled by a reordered packet.
//! With a reorder tolerance configured, new gaps are parked here with a
//! countdown in loss-report cycles and only reported once it runs out.

use crate::loss::LossRange;
use crate::sequence::SeqNumber;
use std::collections::VecDeque;
use std::time::Instant;

/// Outcome of revoking sequence numbers from a [`FreshLoss`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revoke {
    /// Nothing matched
    None,
    /// One end of the range was cut off
    Stripped,
    /// The sequence is interior; the caller must split the range
    Split,
    /// The range is gone entirely
    Delete,
}

/// A gap not yet reported to the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshLoss {
    pub lo: SeqNumber,
    pub hi: SeqNumber,
    /// Report cycles left before the gap counts as lost
    pub ttl: u32,
    /// When the gap was detected
    pub timestamp: Instant,
}

impl FreshLoss {
    pub fn new(lo: SeqNumber, hi: SeqNumber, ttl: u32, now: Instant) -> Self {
        FreshLoss {
            lo,
            hi,
            ttl,
            timestamp: now,
        }
    }

    /// Account for `seq` having arrived
    pub fn revoke(&mut self, seq: SeqNumber) -> Revoke {
        if seq.lt(self.lo) || seq.gt(self.hi) {
            return Revoke::None;
        }

        if seq == self.lo {
            if seq == self.hi {
                return Revoke::Delete;
            }
            self.lo = self.lo.next();
            return Revoke::Stripped;
        }

        if seq == self.hi {
            self.hi = self.hi.prev();
            return Revoke::Stripped;
        }

        Revoke::Split
    }

    /// Account for everything in `[lo, hi]` being filled or given up on
    ///
    /// A range lying entirely before `lo` is older than anything revoked and
    /// is deleted as well.
    pub fn revoke_range(&mut self, lo: SeqNumber, hi: SeqNumber) -> Revoke {
        if lo.gt(self.hi) {
            return Revoke::Delete;
        }
        if hi.lt(self.lo) {
            return Revoke::None;
        }
        if hi.lt(self.hi) {
            self.lo = hi.next();
            return Revoke::Stripped;
        }
        Revoke::Delete
    }
}

/// Fresh losses in sequence order
#[derive(Debug, Clone, Default)]
pub struct FreshLossList {
    entries: VecDeque<FreshLoss>,
}

impl FreshLossList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a newly detected gap
    pub fn push(&mut self, lo: SeqNumber, hi: SeqNumber, ttl: u32, now: Instant) {
        self.entries.push_back(FreshLoss::new(lo, hi, ttl, now));
    }

    /// Remove a single arrived sequence number
    ///
    /// Returns the remaining ttl of the entry it belonged to, or `None` if no
    /// entry covered it.
    pub fn remove_one(&mut self, seq: SeqNumber) -> Option<u32> {
        for i in 0..self.entries.len() {
            let entry = &mut self.entries[i];
            let ttl = entry.ttl;
            match entry.revoke(seq) {
                Revoke::None => continue,
                Revoke::Stripped => {}
                Revoke::Delete => {
                    self.entries.remove(i);
                }
                Revoke::Split => {
                    let upper = FreshLoss {
                        lo: seq.next(),
                        hi: entry.hi,
                        ttl,
                        timestamp: entry.timestamp,
                    };
                    entry.hi = seq.prev();
                    self.entries.insert(i + 1, upper);
                }
            }
            return Some(ttl);
        }
        None
    }

    /// Revoke `[lo, hi]` from the oldest entries
    ///
    /// Returns the number of entries deleted.
    pub fn revoke_range(&mut self, lo: SeqNumber, hi: SeqNumber) -> usize {
        let mut deleted = 0;
        while let Some(front) = self.entries.front_mut() {
            match front.revoke_range(lo, hi) {
                Revoke::Delete => {
                    self.entries.pop_front();
                    deleted += 1;
                }
                _ => break,
            }
        }
        deleted
    }

    /// Count down one report cycle
    ///
    /// Entries whose ttl runs out are removed and returned; they should now
    /// be reported as lost.
    pub fn age(&mut self) -> Vec<LossRange> {
        let mut expired = Vec::new();
        self.entries.retain_mut(|entry| {
            entry.ttl = entry.ttl.saturating_sub(1);
            if entry.ttl == 0 {
                expired.push(LossRange::new(entry.lo, entry.hi));
                false
            } else {
                true
            }
        });
        if !expired.is_empty() {
            tracing::trace!(count = expired.len(), "fresh losses expired");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FreshLoss> {
        self.entries.iter()
    }
}
