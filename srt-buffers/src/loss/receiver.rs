//! Receiver loss list
//!
//! Sequence ranges detected missing on arrival and not received since. Only
//! ever extended at the tail (new gaps are always beyond everything seen so
//! far) and shrunk anywhere as retransmissions arrive. Owned by the thread
//! doing loss bookkeeping, so it has no lock of its own.

use crate::loss::{LossRange, LOSS_RANGE_FIRST};
use crate::sequence::SeqNumber;

#[derive(Debug, Clone, Copy, Default)]
struct Node {
    start: Option<SeqNumber>,
    /// None for a single-packet range
    end: Option<SeqNumber>,
    next: Option<usize>,
    prior: Option<usize>,
}

/// Loss list used by the receiver to build loss reports
#[derive(Debug)]
pub struct RecvLossList {
    nodes: Vec<Node>,
    size: usize,
    head: Option<usize>,
    tail: Option<usize>,
    length: usize,
    largest_seq: Option<SeqNumber>,
}

impl RecvLossList {
    /// Create a list covering at most `size` consecutive sequence numbers
    pub fn new(size: usize) -> Self {
        let size = size.max(2);
        RecvLossList {
            nodes: vec![Node::default(); size],
            size,
            head: None,
            tail: None,
            length: 0,
            largest_seq: None,
        }
    }

    /// Record `[lo, hi]` as missing
    ///
    /// The range must lie beyond every sequence number already inserted or
    /// removed. A range overlapping that frontier is trimmed to start just
    /// after it; a range entirely behind it is ignored.
    pub fn insert(&mut self, lo: SeqNumber, hi: SeqNumber) {
        let mut lo = lo;
        if let Some(largest) = self.largest_seq {
            if lo.le(largest) {
                if hi.gt(largest) {
                    tracing::warn!(%lo, adjusted = %largest.next(), "recv loss insert: start too small, adjusted");
                    lo = largest.next();
                } else {
                    tracing::warn!(%lo, %hi, %largest, length = self.length, "recv loss insert: range too small, rejected");
                    return;
                }
            }
        }

        let head = match self.head {
            Some(head) => head,
            None => {
                if SeqNumber::seqlen(lo, hi) as usize > self.size {
                    tracing::warn!(%lo, %hi, size = self.size, "recv loss insert: range exceeds list size");
                    return;
                }
                self.largest_seq = Some(hi);
                self.head = Some(0);
                self.tail = Some(0);
                self.nodes[0] = Node {
                    start: Some(lo),
                    end: (hi != lo).then_some(hi),
                    next: None,
                    prior: None,
                };
                self.length += SeqNumber::seqlen(lo, hi) as usize;
                return;
            }
        };

        let head_start = self.seq_start(head);
        let offset = head_start.distance_to(lo);
        if offset < 0 {
            tracing::error!(%lo, %hi, head = %head_start, "recv loss insert: new loss predates head");
            return;
        }
        if SeqNumber::seqlen(head_start, hi) as usize > self.size {
            tracing::warn!(%lo, %hi, head = %head_start, size = self.size, "recv loss insert: list span exceeded");
            return;
        }
        self.largest_seq = Some(hi);

        let tail = match self.tail {
            Some(tail) => tail,
            None => unreachable!("recv loss list has a head but no tail"),
        };
        let loc = (head + offset as usize) % self.size;

        match self.nodes[tail].end {
            Some(end) if end.next() == lo => {
                self.nodes[tail].end = Some(hi);
            }
            _ => {
                self.nodes[loc] = Node {
                    start: Some(lo),
                    end: (hi != lo).then_some(hi),
                    next: None,
                    prior: Some(tail),
                };
                self.nodes[tail].next = Some(loc);
                self.tail = Some(loc);
            }
        }

        self.length += SeqNumber::seqlen(lo, hi) as usize;
    }

    /// Mark `seq` as received; returns false if it was not in the list
    pub fn remove(&mut self, seq: SeqNumber) -> bool {
        if self.largest_seq.map_or(true, |largest| seq.gt(largest)) {
            self.largest_seq = Some(seq);
        }

        let head = match self.head {
            Some(head) => head,
            None => return false,
        };

        let offset = self.seq_start(head).distance_to(seq);
        if offset < 0 || offset as usize >= self.size {
            return false;
        }
        let loc = (head + offset as usize) % self.size;

        if self.nodes[loc].start == Some(seq) {
            match self.nodes[loc].end {
                None => {
                    // The whole range was this one packet
                    let Node { next, prior, .. } = self.nodes[loc];
                    match prior {
                        None => self.head = next,
                        Some(p) => self.nodes[p].next = next,
                    }
                    match next {
                        None => self.tail = prior,
                        Some(n) => self.nodes[n].prior = prior,
                    }
                    self.nodes[loc] = Node::default();
                }
                Some(end) => {
                    // Move the node one position forward
                    let i = (loc + 1) % self.size;
                    let start = seq.next();
                    let Node { next, prior, .. } = self.nodes[loc];
                    self.nodes[i] = Node {
                        start: Some(start),
                        end: end.gt(start).then_some(end),
                        next,
                        prior,
                    };
                    self.nodes[loc] = Node::default();

                    match prior {
                        None => self.head = Some(i),
                        Some(p) => self.nodes[p].next = Some(i),
                    }
                    match next {
                        None => self.tail = Some(i),
                        Some(n) => self.nodes[n].prior = Some(i),
                    }
                }
            }
            self.length -= 1;
            return true;
        }

        // Not a range start: find the range that may contain it
        let mut i = (loc + self.size - 1) % self.size;
        while self.nodes[i].start.is_none() {
            i = (i + self.size - 1) % self.size;
        }

        let i_start = self.seq_start(i);
        let i_end = match self.nodes[i].end {
            Some(end) if seq.le(end) => end,
            _ => return false,
        };

        if seq == i_end {
            self.nodes[i].end = (seq != i_start.next()).then(|| seq.prev());
        } else {
            // Split into [i_start, seq - 1] and [seq + 1, i_end]
            let split = (loc + 1) % self.size;
            let start = seq.next();
            let next = self.nodes[i].next;
            self.nodes[split] = Node {
                start: Some(start),
                end: i_end.gt(start).then_some(i_end),
                next,
                prior: Some(i),
            };
            self.nodes[i].end = (seq != i_start.next()).then(|| seq.prev());
            self.nodes[i].next = Some(split);
            match next {
                None => self.tail = Some(split),
                Some(n) => self.nodes[n].prior = Some(split),
            }
        }

        self.length -= 1;
        true
    }

    /// Mark every sequence number in `[lo, hi]` as received
    ///
    /// Returns true if anything was removed.
    pub fn remove_range(&mut self, lo: SeqNumber, hi: SeqNumber) -> bool {
        if hi.lt(lo) {
            return false;
        }
        let mut removed = false;
        let mut seq = lo;
        loop {
            removed |= self.remove(seq);
            if seq == hi {
                break;
            }
            if self.length == 0 {
                // Nothing left to remove, only the frontier moves
                self.remove(hi);
                break;
            }
            seq = seq.next();
        }
        removed
    }

    /// Drop every loss up to and including `seq`
    ///
    /// Returns the first sequence number that was removed, if any.
    pub fn remove_up_to(&mut self, seq: SeqNumber) -> Option<SeqNumber> {
        let first = self.first_lost_seq()?;
        if first.gt(seq) {
            return None;
        }

        while let Some(head) = self.head {
            let start = self.seq_start(head);
            if start.gt(seq) {
                break;
            }
            let end = self.seq_end(head);
            let next = self.nodes[head].next;

            if end.le(seq) {
                self.length -= SeqNumber::seqlen(start, end) as usize;
                self.nodes[head] = Node::default();
                self.head = next;
                match next {
                    Some(n) => self.nodes[n].prior = None,
                    None => self.tail = None,
                }
            } else {
                let new_start = seq.next();
                let pos = (head + start.distance_to(new_start) as usize) % self.size;
                self.length -= SeqNumber::seqlen(start, seq) as usize;
                self.nodes[head] = Node::default();
                self.nodes[pos] = Node {
                    start: Some(new_start),
                    end: end.gt(new_start).then_some(end),
                    next,
                    prior: None,
                };
                self.head = Some(pos);
                match next {
                    Some(n) => self.nodes[n].prior = Some(pos),
                    None => self.tail = Some(pos),
                }
                break;
            }
        }

        Some(first)
    }

    /// Whether any lost sequence number falls within `[lo, hi]`
    pub fn find(&self, lo: SeqNumber, hi: SeqNumber) -> bool {
        let mut p = self.head;
        while let Some(i) = p {
            let start = self.seq_start(i);
            if start == lo
                || (start.gt(lo) && start.le(hi))
                || (start.lt(lo) && self.nodes[i].end.map_or(false, |end| end.ge(lo)))
            {
                return true;
            }
            p = self.nodes[i].next;
        }
        false
    }

    /// Number of lost sequence numbers in the list
    pub fn loss_length(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn first_lost_seq(&self) -> Option<SeqNumber> {
        self.head.map(|h| self.seq_start(h))
    }

    /// Largest sequence number inserted or removed so far
    pub fn largest_seq(&self) -> Option<SeqNumber> {
        self.largest_seq
    }

    /// Encode the list for a loss report
    ///
    /// A range is written as its start with [`LOSS_RANGE_FIRST`] set followed
    /// by its end; a single loss is written as-is. At most `limit - 1` words
    /// are produced, plus the end word of a range started within the limit.
    pub fn loss_array(&self, limit: usize) -> Vec<u32> {
        let mut array = Vec::new();
        let mut p = self.head;
        while let Some(i) = p {
            if array.len() + 1 >= limit {
                break;
            }
            let start = self.seq_start(i).as_raw();
            match self.nodes[i].end {
                Some(end) => {
                    array.push(start | LOSS_RANGE_FIRST);
                    array.push(end.as_raw());
                }
                None => array.push(start),
            }
            p = self.nodes[i].next;
        }
        array
    }

    /// Snapshot of the stored ranges in sequence order
    pub fn ranges(&self) -> Vec<LossRange> {
        let mut out = Vec::new();
        let mut p = self.head;
        while let Some(i) = p {
            out.push(LossRange::new(self.seq_start(i), self.seq_end(i)));
            p = self.nodes[i].next;
        }
        out
    }

    fn seq_start(&self, pos: usize) -> SeqNumber {
        match self.nodes[pos].start {
            Some(s) => s,
            None => unreachable!("recv loss list node {} is not in use", pos),
        }
    }

    fn seq_end(&self, pos: usize) -> SeqNumber {
        self.nodes[pos].end.unwrap_or_else(|| self.seq_start(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::decode_loss_array;

    fn seq(v: u32) -> SeqNumber {
        SeqNumber::new(v)
    }

    fn range(a: u32, b: u32) -> LossRange {
        LossRange::new(seq(a), seq(b))
    }

    fn list_with(ranges: &[(u32, u32)]) -> RecvLossList {
        let mut list = RecvLossList::new(64);
        for &(a, b) in ranges {
            list.insert(seq(a), seq(b));
        }
        list
    }

    #[test]
    fn test_insert_appends() {
        let list = list_with(&[(10, 12), (15, 15), (20, 22)]);
        assert_eq!(list.ranges(), vec![range(10, 12), range(15, 15), range(20, 22)]);
        assert_eq!(list.loss_length(), 7);
        assert_eq!(list.first_lost_seq(), Some(seq(10)));
    }

    #[test]
    fn test_insert_extends_tail_range() {
        let list = list_with(&[(10, 12), (13, 14)]);
        assert_eq!(list.ranges(), vec![range(10, 14)]);
        assert_eq!(list.loss_length(), 5);
    }

    #[test]
    fn test_insert_behind_largest() {
        let mut list = list_with(&[(10, 12)]);
        list.insert(seq(5), seq(8));
        assert_eq!(list.loss_length(), 3);

        // Overlap is trimmed to the part beyond the largest seen
        list.insert(seq(11), seq(16));
        assert_eq!(list.ranges(), vec![range(10, 16)]);
        assert_eq!(list.loss_length(), 7);
    }

    #[test]
    fn test_remove_single() {
        let mut list = list_with(&[(10, 10), (12, 12), (14, 14)]);
        assert!(list.remove(seq(12)));
        assert_eq!(list.ranges(), vec![range(10, 10), range(14, 14)]);
        assert!(list.remove(seq(10)));
        assert!(list.remove(seq(14)));
        assert!(list.is_empty());
        assert!(!list.remove(seq(14)));
    }

    #[test]
    fn test_remove_range_start_and_end() {
        let mut list = list_with(&[(10, 13)]);
        assert!(list.remove(seq(10)));
        assert_eq!(list.ranges(), vec![range(11, 13)]);
        assert!(list.remove(seq(13)));
        assert_eq!(list.ranges(), vec![range(11, 12)]);
        assert!(list.remove(seq(12)));
        assert_eq!(list.ranges(), vec![range(11, 11)]);
        assert_eq!(list.loss_length(), 1);
    }

    #[test]
    fn test_remove_splits_range() {
        let mut list = list_with(&[(10, 14), (20, 20)]);
        assert!(list.remove(seq(12)));
        assert_eq!(list.ranges(), vec![range(10, 11), range(13, 14), range(20, 20)]);
        assert_eq!(list.loss_length(), 5);

        assert!(list.remove(seq(11)));
        assert!(list.remove(seq(13)));
        assert_eq!(list.ranges(), vec![range(10, 10), range(14, 14), range(20, 20)]);
    }

    #[test]
    fn test_remove_not_lost() {
        let mut list = list_with(&[(10, 11), (20, 21)]);
        assert!(!list.remove(seq(15)));
        assert!(!list.remove(seq(5)));
        assert_eq!(list.loss_length(), 4);
    }

    #[test]
    fn test_remove_updates_largest() {
        let mut list = RecvLossList::new(64);
        list.remove(seq(30));
        list.insert(seq(25), seq(28));
        assert!(list.is_empty());
        list.insert(seq(31), seq(32));
        assert_eq!(list.loss_length(), 2);
    }

    #[test]
    fn test_remove_range() {
        let mut list = list_with(&[(10, 14), (16, 18)]);
        assert!(list.remove_range(seq(12), seq(17)));
        assert_eq!(list.ranges(), vec![range(10, 11), range(18, 18)]);
        assert!(!list.remove_range(seq(40), seq(45)));
        assert_eq!(list.largest_seq(), Some(seq(45)));
    }

    #[test]
    fn test_remove_up_to() {
        let mut list = list_with(&[(10, 12), (15, 18), (25, 25)]);
        assert_eq!(list.remove_up_to(seq(16)), Some(seq(10)));
        assert_eq!(list.ranges(), vec![range(17, 18), range(25, 25)]);
        assert_eq!(list.loss_length(), 3);

        assert_eq!(list.remove_up_to(seq(5)), None);
        assert_eq!(list.remove_up_to(seq(30)), Some(seq(17)));
        assert!(list.is_empty());
        assert_eq!(list.loss_length(), 0);
    }

    #[test]
    fn test_find() {
        let list = list_with(&[(10, 12), (20, 20)]);
        assert!(list.find(seq(10), seq(10)));
        assert!(list.find(seq(11), seq(11)));
        assert!(list.find(seq(5), seq(10)));
        assert!(list.find(seq(15), seq(25)));
        assert!(!list.find(seq(13), seq(19)));
        assert!(!list.find(seq(21), seq(30)));
    }

    #[test]
    fn test_loss_array() {
        let list = list_with(&[(10, 12), (15, 15), (20, 22)]);
        let array = list.loss_array(16);
        assert_eq!(array, vec![10 | LOSS_RANGE_FIRST, 12, 15, 20 | LOSS_RANGE_FIRST, 22]);
        assert_eq!(decode_loss_array(&array), list.ranges());

        assert_eq!(list.loss_array(3), vec![10 | LOSS_RANGE_FIRST, 12]);
        // A range started within the limit is always closed
        assert_eq!(list.loss_array(2), vec![10 | LOSS_RANGE_FIRST, 12]);
        assert!(list.loss_array(1).is_empty());

        let singles = list_with(&[(5, 5), (7, 7), (9, 9)]);
        assert_eq!(singles.loss_array(3), vec![5, 7]);
    }

    #[test]
    fn test_wraparound() {
        let max = crate::sequence::MAX_SEQ_NUMBER;
        let mut list = RecvLossList::new(64);
        list.insert(seq(max - 1), seq(2));
        assert_eq!(list.loss_length(), 5);
        assert!(list.remove(seq(0)));
        assert_eq!(list.ranges(), vec![range(max - 1, max), range(1, 2)]);
    }
}
