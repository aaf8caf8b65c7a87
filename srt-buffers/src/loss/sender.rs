//! Sender loss list
//!
//! Sequence ranges the peer reported lost, waiting for retransmission. Fed
//! by NAK processing, drained by the sending path and trimmed by ACKs, so it
//! carries its own lock.

use crate::loss::LossRange;
use crate::sequence::SeqNumber;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, Default)]
struct Node {
    start: Option<SeqNumber>,
    /// None for a single-packet range
    end: Option<SeqNumber>,
    next: Option<usize>,
}

#[derive(Debug)]
struct Inner {
    nodes: Vec<Node>,
    head: Option<usize>,
    length: usize,
    /// Position of the most recent insertion, speeds up ascending NAKs
    last_insert: Option<usize>,
}

/// Loss list used by the sender to schedule retransmissions
#[derive(Debug)]
pub struct SendLossList {
    size: usize,
    inner: Mutex<Inner>,
}

impl SendLossList {
    /// Create a list able to hold ranges spanning fewer than `size` packets
    pub fn new(size: usize) -> Self {
        let size = size.max(2);
        SendLossList {
            size,
            inner: Mutex::new(Inner {
                nodes: vec![Node::default(); size],
                head: None,
                length: 0,
                last_insert: None,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Record `[lo, hi]` as lost
    ///
    /// Returns the number of sequence numbers that were not already in the
    /// list. Ranges that are empty, as long as the list, or too far from the
    /// current head are rejected and count as zero.
    pub fn insert(&self, lo: SeqNumber, hi: SeqNumber) -> usize {
        let range = SeqNumber::seqlen(lo, hi);
        if range <= 0 || range as usize >= self.size {
            tracing::warn!(%lo, %hi, size = self.size, "send loss insert: bad range, ignored");
            return 0;
        }

        let size = self.size as i64;
        let mut g = self.inner.lock();

        let head = match g.head {
            Some(head) => head,
            None => {
                g.insert_head(0, lo, hi);
                return g.length;
            }
        };

        let origlen = g.length;
        let offset = g.seq_start(head).distance_to(lo) as i64;
        if offset >= size {
            tracing::warn!(%lo, offset, size = self.size, "send loss insert: too far ahead of head");
            return 0;
        }

        let mut loc = (head as i64 + offset).rem_euclid(size) as usize;
        if let Some(existing) = g.nodes[loc].start {
            if existing != lo {
                tracing::warn!(%lo, %existing, "send loss insert: range wraps the list, ignored");
                return 0;
            }
        }

        if offset < 0 {
            g.insert_head(loc, lo, hi);
        } else if offset > 0 {
            if g.nodes[loc].start == Some(lo) {
                if !g.update_element(loc, lo, hi) {
                    return 0;
                }
            } else {
                let mut i = head;
                if let Some(last) = g.last_insert {
                    if g.nodes[last].start.map_or(false, |s| s.lt(lo)) {
                        i = last;
                    }
                }
                while let Some(n) = g.nodes[i].next {
                    if g.seq_start(n).lt(lo) {
                        i = n;
                    } else {
                        break;
                    }
                }

                let seqend = g.seq_end(i);
                if seqend.lt(lo) && seqend.next() != lo {
                    g.insert_after(loc, i, lo, hi);
                } else {
                    // Overlaps or touches the range at `i`: extend it
                    g.last_insert = Some(i);
                    if seqend.ge(hi) {
                        return 0;
                    }
                    g.length += (SeqNumber::seqlen(seqend, hi) - 1) as usize;
                    g.nodes[i].end = Some(hi);
                    loc = i;
                }
            }
        } else if !g.update_element(head, lo, hi) {
            return 0;
        }

        g.coalesce(loc);
        g.length - origlen
    }

    /// Remove `seq` and every sequence number before it
    pub fn remove_up_to(&self, seq: SeqNumber) {
        let size = self.size as i64;
        let mut g = self.inner.lock();

        let head = match g.head {
            Some(head) => head,
            None => return,
        };

        let offset = g.seq_start(head).distance_to(seq) as i64;
        let mut loc = (head as i64 + offset).rem_euclid(size) as usize;

        if offset == 0 {
            loc = (loc + 1) % self.size;
            let new_head = match g.nodes[head].end {
                None => g.nodes[head].next,
                Some(end) => {
                    let start = seq.next();
                    g.nodes[loc].start = Some(start);
                    if end.gt(start) {
                        g.nodes[loc].end = Some(end);
                    }
                    g.nodes[head].end = None;
                    g.nodes[loc].next = g.nodes[head].next;
                    Some(loc)
                }
            };
            g.nodes[head].start = None;
            if g.last_insert == Some(head) {
                g.last_insert = None;
            }
            g.head = new_head;
            g.length -= 1;
        } else if offset > 0 {
            let first = head;

            if g.nodes[loc].start == Some(seq) {
                let temp = loc;
                loc = (loc + 1) % self.size;
                match g.nodes[temp].end {
                    None => g.head = g.nodes[temp].next,
                    Some(end) => {
                        let start = seq.next();
                        g.nodes[loc].start = Some(start);
                        if end.gt(start) {
                            g.nodes[loc].end = Some(end);
                        }
                        g.head = Some(loc);
                        g.nodes[loc].next = g.nodes[temp].next;
                        g.nodes[temp].next = Some(loc);
                        g.nodes[temp].end = None;
                    }
                }
            } else {
                let mut i = head;
                while let Some(n) = g.nodes[i].next {
                    if g.seq_start(n).lt(seq) {
                        i = n;
                    } else {
                        break;
                    }
                }

                loc = (loc + 1) % self.size;
                match g.nodes[i].end {
                    Some(end) if end.gt(seq) => {
                        let start = seq.next();
                        g.nodes[loc].start = Some(start);
                        if end.gt(start) {
                            g.nodes[loc].end = Some(end);
                        }
                        g.nodes[i].end = Some(seq);
                        g.nodes[loc].next = g.nodes[i].next;
                        g.nodes[i].next = Some(loc);
                        g.head = Some(loc);
                    }
                    _ => g.head = g.nodes[i].next,
                }
            }

            // Release everything between the old and the new head
            let mut h = Some(first);
            while h != g.head {
                let Some(p) = h else { break };
                let removed = match g.nodes[p].end {
                    Some(end) => SeqNumber::seqlen(g.seq_start(p), end) as usize,
                    None => 1,
                };
                g.length -= removed;
                g.nodes[p].start = None;
                g.nodes[p].end = None;
                if g.last_insert == Some(p) {
                    g.last_insert = None;
                }
                h = g.nodes[p].next;
            }
        }
    }

    /// Take the first lost sequence number off the list
    pub fn pop_lost_seq(&self) -> Option<SeqNumber> {
        let mut g = self.inner.lock();
        let head = g.head?;

        if g.last_insert == Some(head) {
            g.last_insert = None;
        }

        let seq = g.seq_start(head);
        match g.nodes[head].end {
            None => {
                g.nodes[head].start = None;
                g.head = g.nodes[head].next;
            }
            Some(end) => {
                let loc = (head + 1) % self.size;
                let start = seq.next();
                g.nodes[loc].start = Some(start);
                if end.gt(start) {
                    g.nodes[loc].end = Some(end);
                }
                g.nodes[head].start = None;
                g.nodes[head].end = None;
                g.nodes[loc].next = g.nodes[head].next;
                g.head = Some(loc);
            }
        }

        g.length -= 1;
        Some(seq)
    }

    /// Number of sequence numbers in the list
    pub fn loss_length(&self) -> usize {
        self.inner.lock().length
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().head.is_none()
    }

    /// Snapshot of the stored ranges in sequence order
    pub fn ranges(&self) -> Vec<LossRange> {
        let g = self.inner.lock();
        let mut out = Vec::new();
        let mut p = g.head;
        while let Some(i) = p {
            out.push(LossRange::new(g.seq_start(i), g.seq_end(i)));
            p = g.nodes[i].next;
        }
        out
    }
}

impl Inner {
    fn seq_start(&self, pos: usize) -> SeqNumber {
        match self.nodes[pos].start {
            Some(s) => s,
            None => unreachable!("send loss list node {} is not in use", pos),
        }
    }

    fn seq_end(&self, pos: usize) -> SeqNumber {
        self.nodes[pos].end.unwrap_or_else(|| self.seq_start(pos))
    }

    fn insert_head(&mut self, pos: usize, lo: SeqNumber, hi: SeqNumber) {
        debug_assert!(self.nodes[pos].end.is_none());
        self.nodes[pos].start = Some(lo);
        if hi != lo {
            self.nodes[pos].end = Some(hi);
        }
        self.nodes[pos].next = self.head;
        self.head = Some(pos);
        self.last_insert = Some(pos);
        self.length += SeqNumber::seqlen(lo, hi) as usize;
    }

    fn insert_after(&mut self, pos: usize, after: usize, lo: SeqNumber, hi: SeqNumber) {
        debug_assert!(self.nodes[pos].end.is_none());
        self.nodes[pos].start = Some(lo);
        if hi != lo {
            self.nodes[pos].end = Some(hi);
        }
        self.nodes[pos].next = self.nodes[after].next;
        self.nodes[after].next = Some(pos);
        self.last_insert = Some(pos);
        self.length += SeqNumber::seqlen(lo, hi) as usize;
    }

    /// Extend the range at `pos`, which starts at `lo`, up to `hi`
    fn update_element(&mut self, pos: usize, lo: SeqNumber, hi: SeqNumber) -> bool {
        self.last_insert = Some(pos);
        if hi == lo {
            return false;
        }

        match self.nodes[pos].end {
            None => {
                self.length += (SeqNumber::seqlen(lo, hi) - 1) as usize;
                self.nodes[pos].end = Some(hi);
                true
            }
            Some(end) if hi.le(end) => false,
            Some(end) => {
                self.length += (SeqNumber::seqlen(end, hi) - 1) as usize;
                self.nodes[pos].end = Some(hi);
                true
            }
        }
    }

    /// Merge the range at `loc` with following ranges it now reaches
    fn coalesce(&mut self, loc: usize) {
        while let (Some(i), Some(loc_end)) = (self.nodes[loc].next, self.nodes[loc].end) {
            let i_start = self.seq_start(i);
            if i_start.gt(loc_end.next()) {
                break;
            }

            match self.nodes[i].end {
                Some(i_end) => {
                    if i_end.gt(loc_end) {
                        if loc_end.ge(i_start) {
                            self.length -= SeqNumber::seqlen(i_start, loc_end) as usize;
                        }
                        self.nodes[loc].end = Some(i_end);
                    } else {
                        self.length -= SeqNumber::seqlen(i_start, i_end) as usize;
                    }
                }
                None => {
                    if i_start == loc_end.next() {
                        self.nodes[loc].end = Some(i_start);
                    } else {
                        self.length -= 1;
                    }
                }
            }

            self.nodes[i].start = None;
            self.nodes[i].end = None;
            self.nodes[loc].next = self.nodes[i].next;
            if self.last_insert == Some(i) {
                self.last_insert = Some(loc);
            }
        }
    }
}
