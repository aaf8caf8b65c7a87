//! Receiver buffer
//!
//! A circular window of `size` slots indexed by offset from the last
//! acknowledged position:
//!
//! ```text
//!   |<------------------------- size ------------------------->|
//!   |       |<-- acknowledged -->|<---- max_pos ---->|          |
//!   +---+---+---+---+---+---+---+---+---+---+---+---+---+   +---+
//!   |   |   | 1 | 1 | 1 | 0 | 1 | 1 | 1 | 0 | 1 | 1 |   |...|   |
//!   +---+---+---+---+---+---+---+---+---+---+---+---+---+   +---+
//!           |                    |                   |
//!           start_pos            last_ack_pos        last arrival
//! ```
//!
//! Arrivals land beyond `last_ack_pos`; acknowledgment moves `last_ack_pos`
//! forward; the application reads from `start_pos`. One slot always stays
//! empty so a full window can be told apart from an empty one.
//!
//! Cursor movement is not synchronized here: the owner serializes
//! `add_data`, `ack_data` and reads. Byte and packet counters live in a
//! separately locked [`RecvCounters`] so statistics can be sampled without
//! the owner's lock.

use crate::buffer::unit::{Unit, UnitPool, UnitState};
use crate::buffer::BufferError;
use crate::config::BufferConfig;
use crate::packet::{DataPacket, EncryptionKeySpec, PacketBoundary};
use crate::sequence::{MsgNo, SeqNumber};
use crate::stats::{AvgBufSize, BufferSize};
use crate::tsbpd::{DriftTracer, TimeBase, TsbpdTime};
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Initial average payload size: seven MPEG-TS packets
const INITIAL_AVG_PAYLOAD: usize = 7 * 188;

#[derive(Debug)]
struct Counters {
    /// Payload bytes of all units not yet read
    bytes: usize,
    acked_packets: usize,
    acked_bytes: usize,
    avg_payload: usize,
}

/// Byte and packet counters of a [`RecvBuffer`]
///
/// Cloning yields another handle to the same counters.
#[derive(Debug, Clone)]
pub struct RecvCounters {
    inner: Arc<Mutex<Counters>>,
}

impl RecvCounters {
    fn new() -> Self {
        RecvCounters {
            inner: Arc::new(Mutex::new(Counters {
                bytes: 0,
                acked_packets: 0,
                acked_bytes: 0,
                avg_payload: INITIAL_AVG_PAYLOAD,
            })),
        }
    }

    fn add(&self, bytes: usize) {
        let mut c = self.inner.lock();
        c.bytes += bytes;
        if bytes > 0 {
            c.avg_payload = (c.avg_payload * 99 + bytes) / 100;
        }
    }

    fn ack(&self, packets: usize, bytes: usize) {
        let mut c = self.inner.lock();
        c.acked_packets += packets;
        c.acked_bytes += bytes;
    }

    fn remove_acked(&self, packets: usize, bytes: usize) {
        let mut c = self.inner.lock();
        c.acked_packets = c.acked_packets.saturating_sub(packets);
        c.acked_bytes = c.acked_bytes.saturating_sub(bytes);
        c.bytes = c.bytes.saturating_sub(bytes);
    }

    fn remove_unacked(&self, bytes: usize) {
        let mut c = self.inner.lock();
        c.bytes = c.bytes.saturating_sub(bytes);
    }

    /// Payload bytes buffered and not yet read
    pub fn bytes(&self) -> usize {
        self.inner.lock().bytes
    }

    /// Packets acknowledged and not yet read
    pub fn acked_packets(&self) -> usize {
        self.inner.lock().acked_packets
    }

    pub fn acked_bytes(&self) -> usize {
        self.inner.lock().acked_bytes
    }

    /// Exponential average of arriving payload sizes
    pub fn avg_payload_size(&self) -> usize {
        self.inner.lock().avg_payload
    }
}

/// Readiness of the next packet to deliver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadyInfo {
    pub ready: bool,
    /// Delivery time of the reported packet, ready or not
    pub tsbpd_time: Option<Instant>,
    /// Sequence number of the reported packet
    pub cur_seq: Option<SeqNumber>,
}

/// Result of [`RecvBuffer::rcv_first_msg`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirstMsg {
    pub ready: bool,
    pub tsbpd_time: Option<Instant>,
    /// The packet lies beyond the acknowledged region
    pub passack: bool,
    /// Set when lost packets precede the reported one; the caller should
    /// skip up to this sequence number
    pub skip_seq: Option<SeqNumber>,
    pub cur_seq: Option<SeqNumber>,
}

/// A message read by [`RecvBuffer::read_msg`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadMsg {
    /// Bytes copied into the output buffer
    pub len: usize,
    /// Sequence number of the message's first packet
    pub seq: SeqNumber,
    pub msgno: MsgNo,
    /// Scheduled delivery time, when timestamp-based delivery is on
    pub play_time: Option<Instant>,
}

/// Snapshot of the reading positions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadingState {
    pub acknowledged: usize,
    pub unacknowledged: usize,
    /// Delivery time of the packet at the read position
    pub start: Option<Instant>,
    /// Delivery time of the last acknowledged packet
    pub last_ack: Option<Instant>,
    /// Delivery time of the last packet received
    pub end: Option<Instant>,
}

/// Receiver buffer
pub struct RecvBuffer {
    units: Vec<Option<Unit>>,
    size: usize,
    pool: Arc<UnitPool>,
    /// First slot to read
    start_pos: usize,
    /// First slot not acknowledged
    last_ack_pos: usize,
    /// Slots past `last_ack_pos` up to and including the furthest arrival
    max_pos: usize,
    /// Bytes already read from the unit at `start_pos` in stream mode
    notch: usize,
    counters: RecvCounters,
    tsbpd: Option<TsbpdTime>,
    drift: DriftTracer,
    mavg: AvgBufSize,
}

impl RecvBuffer {
    /// Create a new receive buffer
    ///
    /// # Arguments
    /// * `size` - Number of slots (at least 2)
    /// * `pool` - Pool the stored units are released to
    pub fn new(size: usize, pool: Arc<UnitPool>) -> Self {
        let size = size.max(2);
        let mut units = Vec::with_capacity(size);
        units.resize_with(size, || None);
        RecvBuffer {
            units,
            size,
            pool,
            start_pos: 0,
            last_ack_pos: 0,
            max_pos: 0,
            notch: 0,
            counters: RecvCounters::new(),
            tsbpd: None,
            drift: DriftTracer::new(1000, 5000),
            mavg: AvgBufSize::new(),
        }
    }

    /// Create a receive buffer sized and tuned by `config`
    ///
    /// Timestamp-based delivery still has to be switched on with
    /// [`set_tsbpd_mode`](Self::set_tsbpd_mode) once the time base is known.
    pub fn from_config(config: &BufferConfig, pool: Arc<UnitPool>) -> Self {
        Self::new(config.recv.capacity, pool).with_drift_tracer(config.tsbpd.drift_tracer())
    }

    /// Use `drift` as the drift tracer template for timestamp-based delivery
    pub fn with_drift_tracer(mut self, drift: DriftTracer) -> Self {
        self.drift = drift;
        self
    }

    #[inline]
    fn shift(&self, pos: usize, n: usize) -> usize {
        (pos + n) % self.size
    }

    #[inline]
    fn shift_fwd(&self, pos: usize) -> usize {
        if pos + 1 == self.size {
            0
        } else {
            pos + 1
        }
    }

    /// Distance going forward from `from` to `to`
    #[inline]
    fn distance(&self, from: usize, to: usize) -> usize {
        (to + self.size - from) % self.size
    }

    fn is_acked_pos(&self, pos: usize) -> bool {
        self.distance(self.start_pos, pos) < self.rcv_data_size()
    }

    fn good_at(&self, pos: usize) -> Option<&Unit> {
        self.units[pos]
            .as_ref()
            .filter(|u| u.state() == UnitState::Good)
    }

    /// Free the unit at `pos`, keeping the counters in step
    fn release_at(&mut self, pos: usize) -> usize {
        let Some(unit) = self.units[pos].take() else {
            return 0;
        };
        let len = unit.packet().len();
        match unit.state() {
            UnitState::PassAck => {}
            _ if self.is_acked_pos(pos) => self.counters.remove_acked(1, len),
            _ => self.counters.remove_unacked(len),
        }
        self.pool.release(unit);
        len
    }

    fn pass_ack_at(&mut self, pos: usize) {
        let acked = self.is_acked_pos(pos);
        if let Some(unit) = self.units[pos].as_mut() {
            if unit.state() == UnitState::PassAck {
                return;
            }
            let len = unit.packet().len();
            unit.set_state(UnitState::PassAck);
            if acked {
                self.counters.remove_acked(1, len);
            } else {
                self.counters.remove_unacked(len);
            }
        }
    }

    /// Delivery time of `timestamp`, advancing the wrap tracking
    fn play_time(&mut self, timestamp: u32) -> Option<Instant> {
        let tsbpd = self.tsbpd.as_mut()?;
        tsbpd.update_time_base(timestamp);
        Some(tsbpd.pkt_time(timestamp))
    }

    fn peek_play_time(&self, pos: usize) -> Option<Instant> {
        let tsbpd = self.tsbpd.as_ref()?;
        let unit = self.good_at(pos)?;
        Some(tsbpd.pkt_time(unit.packet().timestamp))
    }

    /// Store an arrived unit `offset` slots past the last acknowledged one
    ///
    /// A rejected unit goes straight back to the pool.
    pub fn add_data(&mut self, unit: Unit, offset: usize) -> Result<(), BufferError> {
        let available = self.avail_buf_size();
        if offset >= available {
            tracing::debug!(
                seq = %unit.packet().seq,
                offset,
                available,
                "unit rejected, outside receive window"
            );
            self.pool.release(unit);
            return Err(BufferError::OutOfWindow { offset, available });
        }

        let pos = self.shift(self.last_ack_pos, offset);
        if offset >= self.max_pos {
            self.max_pos = offset + 1;
        }

        if self.units[pos].is_some() {
            tracing::debug!(seq = %unit.packet().seq, offset, "unit rejected, already exists");
            self.pool.release(unit);
            return Err(BufferError::Duplicate { offset });
        }

        tracing::trace!(seq = %unit.packet().seq, offset, pos, "unit accepted");
        self.counters.add(unit.packet().len());
        self.units[pos] = Some(unit);
        Ok(())
    }

    /// Mark the unit at `offset` past the last acknowledged slot as dropped,
    /// e.g. after it failed to decrypt
    pub fn mark_dropped(&mut self, offset: usize) -> bool {
        if offset >= self.avail_buf_size() {
            tracing::debug!(offset, "drop mark outside receive window");
            return false;
        }
        let pos = self.shift(self.last_ack_pos, offset);
        match self.units[pos].as_mut() {
            Some(unit) => {
                unit.set_state(UnitState::Dropped);
                true
            }
            None => false,
        }
    }

    /// Read acknowledged data as a byte stream
    ///
    /// A unit only partially copied stays in place and the next read
    /// continues inside it. With timestamp-based delivery, reading stops at
    /// the first unit not yet due.
    pub fn read_buffer(&mut self, out: &mut [u8], now: Instant) -> usize {
        let mut written = 0;
        let mut p = self.start_pos;
        let last_ack = self.last_ack_pos;

        while p != last_ack && written < out.len() {
            let timestamp = match &self.units[p] {
                Some(unit) => unit.packet().timestamp,
                None => {
                    tracing::error!(pos = p, "empty slot in acknowledged region");
                    p = self.shift_fwd(p);
                    continue;
                }
            };

            if let Some(play_time) = self.play_time(timestamp) {
                if play_time > now {
                    break;
                }
            }

            let (remain, n) = match &self.units[p] {
                Some(unit) => {
                    let payload = &unit.packet().payload;
                    let notch = self.notch.min(payload.len());
                    let remain = payload.len() - notch;
                    let n = remain.min(out.len() - written);
                    out[written..written + n].copy_from_slice(&payload[notch..notch + n]);
                    (remain, n)
                }
                None => break,
            };
            written += n;

            if n == remain {
                self.release_at(p);
                p = self.shift_fwd(p);
                self.notch = 0;
            } else {
                self.notch += n;
            }
        }

        self.start_pos = p;
        written
    }

    /// Acknowledge `n` slots past the last acknowledged one
    ///
    /// Returns the number of slots between the read position and the new
    /// acknowledgment position.
    pub fn ack_data(&mut self, n: usize) -> Result<usize, BufferError> {
        let available = self.avail_buf_size();
        if n > available {
            return Err(BufferError::InvalidAck {
                count: n,
                available,
            });
        }

        let (mut packets, mut bytes) = (0, 0);
        for k in 0..n {
            let pos = self.shift(self.last_ack_pos, k);
            if let Some(unit) = &self.units[pos] {
                if unit.state() != UnitState::PassAck {
                    packets += 1;
                    bytes += unit.packet().len();
                }
            }
        }
        if packets > 0 {
            self.counters.ack(packets, bytes);
        }

        tracing::trace!(
            n,
            start = self.start_pos,
            from = self.last_ack_pos,
            packets,
            "acknowledged"
        );

        self.last_ack_pos = self.shift(self.last_ack_pos, n);
        self.max_pos = self.max_pos.saturating_sub(n);
        Ok(self.rcv_data_size())
    }

    /// Move the acknowledgment position over `n` slots known to be lost
    ///
    /// When nothing is waiting to be read, the read position moves along.
    pub fn skip_data(&mut self, n: usize) -> Result<(), BufferError> {
        let available = self.avail_buf_size();
        if n > available {
            return Err(BufferError::InvalidAck {
                count: n,
                available,
            });
        }

        if self.start_pos == self.last_ack_pos {
            for k in 0..n {
                let pos = self.shift(self.last_ack_pos, k);
                self.release_at(pos);
            }
            self.start_pos = self.shift(self.start_pos, n);
            self.notch = 0;
        } else {
            let (mut packets, mut bytes) = (0, 0);
            for k in 0..n {
                let pos = self.shift(self.last_ack_pos, k);
                if let Some(unit) = &self.units[pos] {
                    if unit.state() != UnitState::PassAck {
                        packets += 1;
                        bytes += unit.packet().len();
                    }
                }
            }
            if packets > 0 {
                self.counters.ack(packets, bytes);
            }
        }

        self.last_ack_pos = self.shift(self.last_ack_pos, n);
        self.max_pos = self.max_pos.saturating_sub(n);
        Ok(())
    }

    /// Remove `n` slots from the read position whether they hold data or not
    ///
    /// Returns the bytes of undelivered data discarded.
    pub fn drop_data(&mut self, n: usize) -> usize {
        let n = n.min(self.size - 1);
        let mut dropped_bytes = 0;

        for k in 0..n {
            let pos = self.shift(self.start_pos, k);
            let good = self.good_at(pos).is_some();
            let len = self.release_at(pos);
            if good {
                dropped_bytes += len;
            }
        }

        let acked = self.rcv_data_size();
        if n > acked {
            let beyond = n - acked;
            self.last_ack_pos = self.shift(self.last_ack_pos, beyond);
            self.max_pos = self.max_pos.saturating_sub(beyond);
        }
        self.start_pos = self.shift(self.start_pos, n);
        self.notch = 0;

        if dropped_bytes > 0 {
            tracing::debug!(slots = n, bytes = dropped_bytes, "dropped receive data");
        }
        dropped_bytes
    }

    /// Mark every buffered packet of message `msgno` as dropped
    pub fn drop_msg(&mut self, msgno: u32, rexmit_flag_used: bool) {
        let span = self.rcv_data_size() + self.max_pos;
        for k in 0..span {
            let pos = self.shift(self.start_pos, k);
            if let Some(unit) = self.units[pos].as_mut() {
                if unit.packet().msg.seq_with(rexmit_flag_used) == msgno {
                    unit.set_state(UnitState::Dropped);
                }
            }
        }
    }

    /// Find the next message ready to play in the acknowledged region
    ///
    /// Invalid, dropped and undecrypted units in front of it are freed on
    /// the way, as are packets not beyond `base_seq`. With `upto` set, reads
    /// stop at the packet `upto` slots before the acknowledgment position and
    /// everything in front of it is freed regardless of its delivery time.
    fn ready_msg(
        &mut self,
        upto: Option<usize>,
        base_seq: Option<SeqNumber>,
        now: Instant,
    ) -> ReadyInfo {
        let mut info = ReadyInfo::default();

        let (end, past_end) = match upto {
            Some(upto) => {
                if upto == 0 || upto > self.rcv_data_size() {
                    return info;
                }
                let end = self.distance(upto, self.last_ack_pos);
                (Some(end), Some(self.shift_fwd(end)))
            }
            None => (None, None),
        };

        while self.start_pos != self.last_ack_pos {
            let pos = self.start_pos;
            if Some(pos) == past_end {
                break;
            }

            let (state, seq, timestamp, key) = match &self.units[pos] {
                Some(unit) => {
                    let pkt = unit.packet();
                    (unit.state(), pkt.seq, pkt.timestamp, pkt.msg.encryption_key)
                }
                None => {
                    self.start_pos = self.shift_fwd(pos);
                    self.notch = 0;
                    continue;
                }
            };
            info.cur_seq = Some(seq);

            let free = if state != UnitState::Good {
                tracing::trace!(%seq, ?state, "skipping unit not good");
                true
            } else if upto.is_none() {
                info.tsbpd_time = self.play_time(timestamp);
                if info.tsbpd_time.map_or(false, |t| t > now) {
                    return info;
                }

                if key != EncryptionKeySpec::None {
                    tracing::debug!(%seq, "skipping undecrypted unit");
                    true
                } else if base_seq.map_or(false, |base| seq.le(base)) {
                    info.tsbpd_time = None;
                    true
                } else {
                    info.ready = true;
                    return info;
                }
            } else if Some(pos) == end {
                info.tsbpd_time = self.play_time(timestamp);
                if key != EncryptionKeySpec::None {
                    true
                } else {
                    info.ready = true;
                    return info;
                }
            } else {
                true
            };

            if free {
                self.release_at(pos);
                self.start_pos = self.shift_fwd(pos);
                self.notch = 0;
            }
        }

        info
    }

    /// Whether a message is ready in the acknowledged region
    pub fn rcv_ready_msg(&mut self, base_seq: Option<SeqNumber>, now: Instant) -> ReadyInfo {
        self.ready_msg(None, base_seq, now)
    }

    /// Find the first packet to deliver, looking past lost packets
    ///
    /// When the acknowledged region has nothing, the region beyond it is
    /// searched for the first packet due; if lost packets precede it,
    /// `skip_seq` tells the caller where delivery can resume instead of
    /// waiting for the gap.
    pub fn rcv_first_msg(&mut self, base_seq: Option<SeqNumber>, now: Instant) -> FirstMsg {
        let ready = self.ready_msg(None, base_seq, now);
        let mut first = FirstMsg {
            ready: ready.ready,
            tsbpd_time: ready.tsbpd_time,
            passack: false,
            skip_seq: None,
            cur_seq: ready.cur_seq,
        };
        if ready.ready || ready.tsbpd_time.is_some() {
            return first;
        }

        first.tsbpd_time = None;
        first.passack = true;

        let mut has_lost = false;
        let mut last_ready_pos = None;

        for k in 0..self.max_pos {
            let pos = self.shift(self.last_ack_pos, k);
            let (seq, timestamp) = match self.good_at(pos) {
                Some(unit) => (unit.packet().seq, unit.packet().timestamp),
                None => {
                    has_lost = true;
                    continue;
                }
            };

            let play_time = self.play_time(timestamp);
            if play_time.map_or(true, |t| t <= now) {
                if let Some(prev) = last_ready_pos {
                    tracing::trace!(pos = prev, "freeing superseded ready packet");
                    self.release_at(prev);
                }
                first.tsbpd_time = play_time;
                first.cur_seq = Some(seq);
                last_ready_pos = Some(pos);
                if has_lost {
                    first.skip_seq = Some(seq);
                }

                if base_seq.map_or(false, |base| seq.le(base)) {
                    continue;
                }

                first.ready = true;
                return first;
            }

            first.ready = last_ready_pos.is_some();
            return first;
        }

        first.ready = last_ready_pos.is_some();
        first
    }

    /// Sequence distance readiness check
    ///
    /// With `seq_distance` set, reports the packet that many slots before the
    /// acknowledgment position, ready regardless of its delivery time.
    /// Otherwise reports the first good acknowledged packet, ready once due.
    /// Without timestamp-based delivery, ready means anything acknowledged.
    pub fn is_rcv_data_ready_at(&mut self, seq_distance: Option<usize>, now: Instant) -> ReadyInfo {
        if self.tsbpd.is_none() {
            return ReadyInfo {
                ready: self.start_pos != self.last_ack_pos,
                ..Default::default()
            };
        }

        let (seq, timestamp) = match self.rcv_ready_packet(seq_distance) {
            Some(pkt) => (pkt.seq, pkt.timestamp),
            None => return ReadyInfo::default(),
        };
        let tsbpd_time = self.play_time(timestamp);
        ReadyInfo {
            ready: seq_distance.is_some() || tsbpd_time.map_or(true, |t| t <= now),
            tsbpd_time,
            cur_seq: Some(seq),
        }
    }

    pub fn is_rcv_data_ready(&mut self, now: Instant) -> bool {
        self.is_rcv_data_ready_at(None, now).ready
    }

    /// The packet `seq_distance` slots before the acknowledgment position,
    /// or the first good acknowledged packet
    pub fn rcv_ready_packet(&self, seq_distance: Option<usize>) -> Option<&DataPacket> {
        match seq_distance {
            Some(distance) => {
                if distance == 0 || distance > self.rcv_data_size() {
                    return None;
                }
                let pos = self.distance(distance, self.last_ack_pos);
                self.good_at(pos).map(Unit::packet)
            }
            None => {
                let span = self.rcv_data_size();
                (0..span)
                    .map(|k| self.shift(self.start_pos, k))
                    .find_map(|pos| self.good_at(pos))
                    .map(Unit::packet)
            }
        }
    }

    /// Read one message into `out`
    ///
    /// Bytes beyond `out` are discarded with the message.
    pub fn read_msg(&mut self, out: &mut [u8], now: Instant) -> Option<ReadMsg> {
        self.read_msg_upto(out, None, now)
    }

    /// Read one message, stopping at the packet `upto` slots before the
    /// acknowledgment position when set
    pub fn read_msg_upto(
        &mut self,
        out: &mut [u8],
        upto: Option<usize>,
        now: Instant,
    ) -> Option<ReadMsg> {
        let (p, q, passack, play_time) = if self.tsbpd.is_some() {
            let info = self.ready_msg(upto, None, now);
            if !info.ready {
                return None;
            }
            (self.start_pos, self.start_pos, false, info.tsbpd_time)
        } else {
            let (p, q, passack) = self.scan_msg()?;
            (p, q, passack, None)
        };

        let (seq, msgno) = match &self.units[p] {
            Some(unit) => (unit.packet().seq, MsgNo::new(unit.packet().msg.seq)),
            None => return None,
        };
        let len = self.extract_data(out, p, q, passack);

        Some(ReadMsg {
            len,
            seq,
            msgno,
            play_time,
        })
    }

    fn extract_data(&mut self, out: &mut [u8], p: usize, q: usize, passack: bool) -> usize {
        let past_q = self.shift_fwd(q);
        let mut written = 0;
        let mut i = p;
        // Bytes of the first unit already handed out by `read_buffer`
        let mut notch = if p == self.start_pos { self.notch } else { 0 };

        while i != past_q {
            if let Some(unit) = &self.units[i] {
                let payload = &unit.packet().payload;
                let skip = notch.min(payload.len());
                notch = 0;
                let n = (payload.len() - skip).min(out.len() - written);
                out[written..written + n].copy_from_slice(&payload[skip..skip + n]);
                written += n;

                if passack {
                    self.pass_ack_at(i);
                } else {
                    self.release_at(i);
                }
            }
            i = self.shift_fwd(i);
        }

        if !passack {
            self.start_pos = past_q;
            self.notch = 0;
        }
        written
    }

    /// Locate the next complete message
    ///
    /// Returns its first and last slot and whether it lies (partly) beyond
    /// the acknowledged region. Leading slots that cannot start a complete
    /// message are freed. Beyond the acknowledged region only messages that
    /// may be delivered out of order qualify. A message filling the whole
    /// window is returned incomplete.
    fn scan_msg(&mut self) -> Option<(usize, usize, bool)> {
        if self.start_pos == self.last_ack_pos && self.max_pos == 0 {
            return None;
        }

        let mut removed = 0;
        while self.start_pos != self.last_ack_pos {
            let start = self.start_pos;
            let starts_message = match self.good_at(start) {
                Some(unit) => unit.packet().msg.boundary.is_first(),
                None if self.units[start].is_none() => {
                    self.start_pos = self.shift_fwd(start);
                    self.notch = 0;
                    continue;
                }
                None => false,
            };

            if starts_message && self.message_complete_from(start) {
                break;
            }

            self.release_at(start);
            removed += 1;
            self.start_pos = self.shift_fwd(start);
            self.notch = 0;
        }
        if removed > 0 {
            tracing::debug!(removed, "freed units not starting a message");
        }

        let mut p: Option<usize> = None;
        let mut q = self.start_pos;
        let mut passack = self.start_pos == self.last_ack_pos;
        let mut found = false;

        let span = self.max_pos + self.rcv_data_size();
        for _ in 0..span {
            match self.good_at(q) {
                Some(unit) => match unit.packet().msg.boundary {
                    PacketBoundary::Solo => {
                        p = Some(q);
                        found = true;
                    }
                    PacketBoundary::First => p = Some(q),
                    PacketBoundary::Last => found = p.is_some(),
                    PacketBoundary::Subsequent => {}
                },
                None => p = None,
            }

            if found {
                let in_order = self
                    .good_at(q)
                    .map_or(true, |unit| unit.packet().msg.in_order);
                if !passack || !in_order {
                    break;
                }
                found = false;
            }

            q = self.shift_fwd(q);
            if q == self.last_ack_pos {
                passack = true;
            }
        }

        if !found {
            // A message larger than the window is delivered in part
            match p {
                Some(p) if self.shift_fwd(q) == p => found = true,
                _ => {}
            }
        }

        if found {
            p.map(|p| (p, q, passack))
        } else {
            None
        }
    }

    /// Whether every unit from `pos` up to a last-of-message boundary (or
    /// the acknowledgment position) is good
    fn message_complete_from(&self, pos: usize) -> bool {
        let mut i = pos;
        while i != self.last_ack_pos {
            match self.good_at(i) {
                Some(unit) if unit.packet().msg.boundary.is_last() => return true,
                Some(_) => {}
                None => return false,
            }
            i = self.shift_fwd(i);
        }
        true
    }

    /// Message number at the read position, if acknowledged data waits
    pub fn top_msgno(&self) -> Option<MsgNo> {
        if self.start_pos == self.last_ack_pos {
            return None;
        }
        self.units[self.start_pos]
            .as_ref()
            .map(|u| MsgNo::new(u.packet().msg.seq))
    }

    /// Slots that can still accept data
    pub fn avail_buf_size(&self) -> usize {
        self.size - self.rcv_data_size() - 1
    }

    /// Slots between the read position and the acknowledgment position
    pub fn rcv_data_size(&self) -> usize {
        self.distance(self.start_pos, self.last_ack_pos)
    }

    /// Acknowledged packets and bytes waiting to be read, and the delivery
    /// timespan they cover when timestamp-based delivery is on
    pub fn rcv_data_stats(&self) -> BufferSize {
        let mut timespan_ms = 0;
        let acked_packets = self.counters.acked_packets();

        if self.tsbpd.is_some() {
            let span = self.rcv_data_size();
            let start = (0..span)
                .map(|k| self.shift(self.start_pos, k))
                .find(|&pos| self.good_at(pos).is_some());

            if let Some(start) = start {
                let end = if self.max_pos == 0 || self.good_at(self.last_ack_pos).is_none() {
                    self.distance(1, self.last_ack_pos)
                } else {
                    self.last_ack_pos
                };

                if let (Some(first), Some(last)) = (self.peek_play_time(start), self.peek_play_time(end)) {
                    if last > first {
                        timespan_ms = last.duration_since(first).as_millis() as u64;
                    }
                }
                if acked_packets > 0 {
                    timespan_ms += 1;
                }
            }
        }

        BufferSize {
            packets: acked_packets,
            bytes: self.counters.acked_bytes(),
            timespan_ms,
        }
    }

    /// Moving average of [`rcv_data_stats`](Self::rcv_data_stats)
    pub fn rcv_avg_data_size(&self) -> BufferSize {
        self.mavg.get()
    }

    pub fn update_avg_data_size(&mut self, now: Instant) {
        if !self.mavg.is_time_to_update(now) {
            return;
        }
        let current = self.rcv_data_stats();
        self.mavg.update(now, current);
    }

    pub fn avg_payload_size(&self) -> usize {
        self.counters.avg_payload_size()
    }

    /// Another handle to this buffer's counters
    pub fn counters(&self) -> RecvCounters {
        self.counters.clone()
    }

    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Slots past the acknowledgment position up to the furthest arrival
    pub fn max_pos(&self) -> usize {
        self.max_pos
    }

    pub fn reading_state(&self) -> ReadingState {
        let mut state = ReadingState {
            unacknowledged: self.max_pos,
            ..Default::default()
        };

        if self.good_at(self.start_pos).is_some() {
            state.start = self.peek_play_time(self.start_pos);
            state.acknowledged = self.rcv_data_size();
        }

        if self.tsbpd.is_none() {
            return state;
        }

        if self.last_ack_pos != self.start_pos {
            state.last_ack = self.peek_play_time(self.distance(1, self.last_ack_pos));
        }

        if self.max_pos == 0 {
            state.end = state.last_ack;
        } else {
            let end = self.shift(self.last_ack_pos, self.max_pos - 1);
            state.end = self.peek_play_time(end);
        }

        state
    }

    /// One-line description of how full the buffer is
    pub fn fullness_state(&self, now: Instant) -> String {
        let state = self.reading_state();
        let signed_ms = |t: Instant| -> i64 {
            if t >= now {
                t.duration_since(now).as_millis() as i64
            } else {
                -(now.duration_since(t).as_millis() as i64)
            }
        };

        let mut out = format!(
            "Space avail {}/{} pkts. Packets ACKed: {}",
            self.avail_buf_size(),
            self.size,
            state.acknowledged
        );
        if let (Some(start), Some(last_ack)) = (state.start, state.last_ack) {
            let _ = write!(
                out,
                " (TSBPD ready in {} : {} ms)",
                signed_ms(start),
                signed_ms(last_ack)
            );
        }
        let _ = write!(out, ", not ACKed: {}", state.unacknowledged);
        if let (Some(start), Some(end)) = (state.start, state.end) {
            let _ = write!(
                out,
                ", timespan {} ms",
                end.saturating_duration_since(start).as_millis()
            );
        }
        let drift_ms = self.tsbpd.as_ref().map_or(0, |t| t.drift_us() / 1000);
        let _ = write!(out, ". drift {} ms.", drift_ms);
        out
    }

    /// Enable timestamp-based delivery
    ///
    /// # Arguments
    /// * `time_base` - Local time corresponding to sender timestamp zero
    /// * `delay` - Receiver latency added to every packet
    pub fn set_tsbpd_mode(&mut self, time_base: Instant, delay: Duration) {
        tracing::debug!(delay_ms = delay.as_millis() as u64, "tsbpd mode enabled");
        self.tsbpd = Some(TsbpdTime::new(time_base, false, delay, self.drift.clone()));
    }

    pub fn is_tsbpd(&self) -> bool {
        self.tsbpd.is_some()
    }

    /// Scheduled delivery time of a packet carrying `timestamp`
    pub fn pkt_tsbpd_time(&mut self, timestamp: u32) -> Option<Instant> {
        self.play_time(timestamp)
    }

    /// Feed a drift sample; returns true when the drift was recalculated
    pub fn add_drift_sample(
        &mut self,
        timestamp: u32,
        arrival: Instant,
        rtt: Option<Duration>,
    ) -> bool {
        match self.tsbpd.as_mut() {
            Some(tsbpd) => tsbpd.add_drift_sample(timestamp, arrival, rtt),
            None => false,
        }
    }

    pub fn internal_time_base(&self) -> Option<TimeBase> {
        self.tsbpd.as_ref().map(TsbpdTime::internal_time_base)
    }

    pub fn apply_group_time(&mut self, base: TimeBase, delay: Duration) {
        match self.tsbpd.as_mut() {
            Some(tsbpd) => tsbpd.apply_group_time(base, delay),
            None => {
                let mut tsbpd = TsbpdTime::new(base.base, base.wrap_check, delay, self.drift.clone());
                tsbpd.apply_group_time(base, delay);
                self.tsbpd = Some(tsbpd);
            }
        }
    }

    pub fn apply_group_drift(&mut self, base: TimeBase) {
        if let Some(tsbpd) = self.tsbpd.as_mut() {
            tsbpd.apply_group_drift(base);
        }
    }
}

impl Drop for RecvBuffer {
    fn drop(&mut self) {
        for slot in self.units.iter_mut() {
            if let Some(unit) = slot.take() {
                self.pool.release(unit);
            }
        }
    }
}
