//! Sender buffer
//!
//! Application messages are split into payload-sized blocks, each tagged with
//! its sequence number, message number and boundary. Blocks stay buffered
//! until acknowledged so that any of them can be read again for
//! retransmission by its offset from the first unacknowledged block.

use crate::buffer::BufferError;
use crate::config::SendConfig;
use crate::packet::{EncryptionKeySpec, MsgNumber, PacketBoundary};
use crate::sequence::{MsgNo, SeqNumber};
use crate::stats::{AvgBufSize, BufferSize, RateEstimator};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Per-message options for [`SendBuffer::add_buffer`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageControl {
    /// Drop the message if it was not sent within this time; `None` never expires
    pub ttl: Option<Duration>,
    /// Receiver must deliver this message in order
    pub in_order: bool,
    /// Origin time to stamp the message with instead of the append time
    pub src_time: Option<Instant>,
    /// Message number to use instead of the next generated one
    pub msgno: Option<MsgNo>,
}

impl MessageControl {
    /// Message with a time-to-live
    pub fn with_ttl(ttl: Duration) -> Self {
        MessageControl {
            ttl: Some(ttl),
            ..Default::default()
        }
    }
}

/// A block read out of the buffer, ready to be put on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPacket {
    pub seq: SeqNumber,
    pub msg: MsgNumber,
    pub origin_time: Instant,
    pub payload: Bytes,
}

/// Outcome of a send buffer read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// A block to send
    Data(SendPacket),
    /// The message expired; all of its `packets` blocks starting at
    /// `first_seq` must be dropped at the receiver
    DropMessage {
        msgno: MsgNo,
        packets: usize,
        first_seq: SeqNumber,
    },
    /// Nothing left to send
    NotReady,
    /// Encryption is required but no key is available; nothing was consumed
    KeyUnavailable,
}

/// Result of [`SendBuffer::drop_late_data`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropLate {
    pub packets: usize,
    pub bytes: usize,
    /// Message number following the last dropped block
    pub first_msgno: Option<MsgNo>,
}

#[derive(Debug, Clone)]
struct Block {
    seq: SeqNumber,
    msg: MsgNumber,
    payload: Bytes,
    origin_time: Instant,
    ttl: Option<Duration>,
    rexmit_time: Option<Instant>,
}

impl Block {
    fn msgno(&self) -> MsgNo {
        MsgNo::new(self.msg.seq)
    }

    fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => {
                now.saturating_duration_since(self.origin_time).as_millis() > ttl.as_millis()
            }
            None => false,
        }
    }
}

#[derive(Debug)]
struct SendState {
    /// Unacknowledged blocks, oldest first
    blocks: VecDeque<Block>,
    /// Index in `blocks` of the next block not sent yet
    curr: usize,
    /// Blocks the buffer can hold before growing
    capacity: usize,
    bytes: usize,
    next_seq: SeqNumber,
    next_msgno: MsgNo,
    last_origin: Option<Instant>,
    rate: RateEstimator,
    mavg: AvgBufSize,
}

impl SendState {
    fn curr_size(&self) -> BufferSize {
        let timespan_ms = match (self.blocks.front(), self.last_origin) {
            (Some(first), Some(last)) => {
                last.saturating_duration_since(first.origin_time).as_millis() as u64 + 1
            }
            _ => 0,
        };
        BufferSize {
            packets: self.blocks.len(),
            bytes: self.bytes,
            timespan_ms,
        }
    }

    fn update_avg(&mut self, now: Instant) {
        if self.mavg.is_time_to_update(now) {
            let current = self.curr_size();
            self.mavg.update(now, current);
        }
    }

    /// Number of blocks of the message starting at `index`
    fn message_len(&self, index: usize) -> usize {
        let msgno = self.blocks[index].msgno();
        self.blocks
            .iter()
            .skip(index)
            .take_while(|b| b.msgno() == msgno)
            .count()
    }
}

/// Sender buffer
///
/// All operations take `&self`; the application thread appends while the
/// sending and ACK-processing threads read, acknowledge and drop under the
/// same lock.
pub struct SendBuffer {
    payload_size: usize,
    growth: usize,
    max_blocks: usize,
    state: Mutex<SendState>,
}

impl SendBuffer {
    /// Create a new send buffer
    ///
    /// # Arguments
    /// * `initial_blocks` - Blocks preallocated, also the growth increment
    /// * `payload_size` - Maximum payload carried by one block
    /// * `initial_seq` - Sequence number of the first block appended
    pub fn new(initial_blocks: usize, payload_size: usize, initial_seq: SeqNumber) -> Self {
        let initial_blocks = initial_blocks.max(1);
        SendBuffer {
            payload_size: payload_size.max(1),
            growth: initial_blocks,
            max_blocks: usize::MAX,
            state: Mutex::new(SendState {
                blocks: VecDeque::with_capacity(initial_blocks),
                curr: 0,
                capacity: initial_blocks,
                bytes: 0,
                next_seq: initial_seq,
                next_msgno: MsgNo::FIRST,
                last_origin: None,
                rate: RateEstimator::new(),
                mavg: AvgBufSize::new(),
            }),
        }
    }

    /// Create a send buffer from configuration
    pub fn from_config(config: &SendConfig, initial_seq: SeqNumber) -> Self {
        let mut buffer = Self::new(config.initial_blocks, config.payload_size, initial_seq);
        buffer.max_blocks = config.max_blocks.max(buffer.growth);
        buffer
    }

    /// Append an application message
    ///
    /// Returns the message number assigned to it.
    pub fn add_buffer(
        &self,
        data: &[u8],
        ctrl: &MessageControl,
        now: Instant,
    ) -> Result<MsgNo, BufferError> {
        if data.is_empty() {
            return Err(BufferError::EmptyMessage);
        }

        let count = (data.len() + self.payload_size - 1) / self.payload_size;
        let mut state = self.state.lock();

        while count + state.blocks.len() >= state.capacity {
            self.increase(&mut state)?;
        }

        let origin_time = ctrl.src_time.unwrap_or(now);
        state.last_origin = Some(origin_time);

        let msgno = ctrl.msgno.unwrap_or(state.next_msgno);
        let message = Bytes::copy_from_slice(data);

        tracing::trace!(
            %msgno,
            packets = count,
            bytes = data.len(),
            in_order = ctrl.in_order,
            "adding message to send buffer"
        );

        for i in 0..count {
            let start = i * self.payload_size;
            let end = (start + self.payload_size).min(data.len());
            let seq = state.next_seq;
            state.next_seq = seq.next();

            let msg = MsgNumber {
                boundary: PacketBoundary::for_segment(i, count),
                in_order: ctrl.in_order,
                ..MsgNumber::new(msgno.as_raw())
            };

            state.blocks.push_back(Block {
                seq,
                msg,
                payload: message.slice(start..end),
                origin_time,
                ttl: ctrl.ttl,
                rexmit_time: None,
            });
        }

        state.bytes += data.len();
        state.rate.update(now, count, data.len());
        state.update_avg(now);
        state.next_msgno = msgno.next();

        Ok(msgno)
    }

    fn increase(&self, state: &mut SendState) -> Result<(), BufferError> {
        let new_capacity = state.capacity + self.growth;
        if new_capacity > self.max_blocks {
            tracing::error!(
                capacity = state.capacity,
                max_blocks = self.max_blocks,
                "send buffer exhausted"
            );
            return Err(BufferError::Exhausted);
        }

        let additional = new_capacity.saturating_sub(state.blocks.len());
        state
            .blocks
            .try_reserve(additional)
            .map_err(|_| BufferError::Exhausted)?;
        state.capacity = new_capacity;

        tracing::debug!(
            blocks = self.growth,
            bytes = self.growth * self.payload_size,
            capacity = new_capacity,
            "send buffer grown"
        );
        Ok(())
    }

    /// Read the next block that was never sent
    ///
    /// The encryption key selected for the first transmission is stored in
    /// the block so that retransmissions carry the same key flags. With
    /// `key == None` (encryption required but no key ready) nothing is
    /// consumed and [`ReadResult::KeyUnavailable`] is returned.
    ///
    /// A block whose message outlived its TTL is not returned; the whole
    /// remaining message is skipped and reported as
    /// [`ReadResult::DropMessage`].
    pub fn read_next(&self, key: Option<EncryptionKeySpec>, now: Instant) -> ReadResult {
        let mut state = self.state.lock();
        let curr = state.curr;
        if curr >= state.blocks.len() {
            return ReadResult::NotReady;
        }

        let Some(key) = key else {
            tracing::debug!(seq = %state.blocks[curr].seq, "encryption required, key unavailable");
            return ReadResult::KeyUnavailable;
        };

        if state.blocks[curr].is_expired(now) {
            let packets = state.message_len(curr);
            let block = &state.blocks[curr];
            let result = ReadResult::DropMessage {
                msgno: block.msgno(),
                packets,
                first_seq: block.seq,
            };
            tracing::warn!(
                seq = %block.seq,
                msgno = %block.msgno(),
                packets,
                "skipping expired message"
            );
            state.curr += packets;
            return result;
        }

        let block = &mut state.blocks[curr];
        block.msg.encryption_key = key;
        let packet = SendPacket {
            seq: block.seq,
            msg: block.msg,
            origin_time: block.origin_time,
            payload: block.payload.clone(),
        };
        state.curr += 1;
        ReadResult::Data(packet)
    }

    /// Read the block at `offset` from the first unacknowledged one for
    /// retransmission
    ///
    /// The returned packet has the retransmitted flag set. If the block's
    /// message outlived its TTL, the message is reported as
    /// [`ReadResult::DropMessage`] and the sequential read position moves past
    /// it if it was inside.
    pub fn read_at(&self, offset: usize, now: Instant) -> Result<ReadResult, BufferError> {
        let mut state = self.state.lock();
        let count = state.blocks.len();
        if offset >= count {
            tracing::error!(offset, count, "retransmission offset too large");
            return Err(BufferError::OutOfRange { offset, count });
        }

        if state.blocks[offset].is_expired(now) {
            let packets = state.message_len(offset);
            let block = &state.blocks[offset];
            let result = ReadResult::DropMessage {
                msgno: block.msgno(),
                packets,
                first_seq: block.seq,
            };
            tracing::debug!(
                first = %block.seq,
                packets,
                msgno = %block.msgno(),
                "TTL exceeded, message to drop"
            );

            let end = offset + packets;
            if (offset..end).contains(&state.curr) {
                state.curr = end;
            }
            return Ok(result);
        }

        let block = &mut state.blocks[offset];
        block.rexmit_time = Some(now);
        Ok(ReadResult::Data(SendPacket {
            seq: block.seq,
            msg: MsgNumber {
                retransmitted: true,
                ..block.msg
            },
            origin_time: block.origin_time,
            payload: block.payload.clone(),
        }))
    }

    /// Release the first `count` blocks after an acknowledgment
    pub fn ack_data(&self, count: usize, now: Instant) -> Result<(), BufferError> {
        let mut state = self.state.lock();
        let available = state.blocks.len();
        if count > available {
            return Err(BufferError::InvalidAck { count, available });
        }

        let released: usize = state.blocks.drain(..count).map(|b| b.payload.len()).sum();
        state.bytes -= released;
        state.curr = state.curr.saturating_sub(count);
        state.update_avg(now);
        Ok(())
    }

    /// Drop blocks from the head whose origin time is before `too_late`
    pub fn drop_late_data(&self, too_late: Instant, now: Instant) -> DropLate {
        let mut state = self.state.lock();
        let packets = state
            .blocks
            .iter()
            .take_while(|b| b.origin_time < too_late)
            .count();

        let mut bytes = 0;
        let mut last_msgno = None;
        for block in state.blocks.drain(..packets) {
            bytes += block.payload.len();
            last_msgno = Some(block.msgno());
        }

        state.bytes -= bytes;
        state.curr = state.curr.saturating_sub(packets);
        state.update_avg(now);

        if packets > 0 {
            tracing::debug!(packets, bytes, "dropped late data");
        }

        DropLate {
            packets,
            bytes,
            first_msgno: last_msgno.map(MsgNo::next),
        }
    }

    /// Origin time of the next block not sent yet
    pub fn peek_next_original(&self) -> Option<Instant> {
        let state = self.state.lock();
        state.blocks.get(state.curr).map(|b| b.origin_time)
    }

    /// Message number of the block at `offset`
    pub fn msgno_at(&self, offset: usize) -> Option<MsgNo> {
        let state = self.state.lock();
        match state.blocks.get(offset) {
            Some(block) => Some(block.msgno()),
            None => {
                tracing::error!(offset, count = state.blocks.len(), "msgno lookup beyond buffer");
                None
            }
        }
    }

    /// When the block at `offset` was last read for retransmission
    pub fn rexmit_time(&self, offset: usize) -> Option<Instant> {
        self.state
            .lock()
            .blocks
            .get(offset)
            .and_then(|b| b.rexmit_time)
    }

    /// Age of the oldest unacknowledged block
    pub fn buffering_delay(&self, now: Instant) -> Duration {
        self.state
            .lock()
            .blocks
            .front()
            .map(|b| now.saturating_duration_since(b.origin_time))
            .unwrap_or(Duration::ZERO)
    }

    /// Current occupancy
    ///
    /// The timespan runs from the oldest block's origin time to the most
    /// recent append, plus one millisecond when not empty.
    pub fn curr_buf_size(&self) -> BufferSize {
        self.state.lock().curr_size()
    }

    /// Moving average of the occupancy, refreshed first if due
    pub fn avg_buf_size(&self, now: Instant) -> BufferSize {
        let mut state = self.state.lock();
        state.update_avg(now);
        state.mavg.get()
    }

    /// Estimated input rate in bytes per second
    pub fn input_rate(&self) -> u64 {
        self.state.lock().rate.rate()
    }

    /// Set the input rate sampling period; zero disables the estimate
    pub fn set_rate_period(&self, period: Duration) {
        self.state.lock().rate.set_period(period);
    }

    /// Sequence number of the first unacknowledged block
    pub fn first_seq(&self) -> SeqNumber {
        let state = self.state.lock();
        state
            .blocks
            .front()
            .map(|b| b.seq)
            .unwrap_or(state.next_seq)
    }

    /// Sequence number the next appended block will get
    pub fn next_seq(&self) -> SeqNumber {
        self.state.lock().next_seq
    }

    /// Number of buffered blocks
    pub fn count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Payload bytes buffered
    pub fn bytes(&self) -> usize {
        self.state.lock().bytes
    }

    /// Blocks the buffer holds before it grows
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(payload_size: usize) -> SendBuffer {
        SendBuffer::new(4, payload_size, SeqNumber::new(100))
    }

    fn data(packet: ReadResult) -> SendPacket {
        match packet {
            ReadResult::Data(p) => p,
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[test]
    fn test_add_splits_into_blocks() {
        let now = Instant::now();
        let buf = buffer(1000);
        let payload: Vec<u8> = (0..3000).map(|i| i as u8).collect();
        let ctrl = MessageControl {
            in_order: true,
            ..Default::default()
        };
        let msgno = buf.add_buffer(&payload, &ctrl, now).unwrap();
        assert_eq!(msgno, MsgNo::FIRST);
        assert_eq!(buf.count(), 3);

        let boundaries: Vec<_> = (0..3)
            .map(|_| data(buf.read_next(Some(EncryptionKeySpec::None), now)))
            .map(|p| {
                assert_eq!(p.payload.len(), 1000);
                assert_eq!(p.msg.seq, 1);
                assert!(p.msg.in_order);
                p.msg.boundary
            })
            .collect();
        assert_eq!(
            boundaries,
            vec![
                PacketBoundary::First,
                PacketBoundary::Subsequent,
                PacketBoundary::Last
            ]
        );
        assert_eq!(buf.read_next(Some(EncryptionKeySpec::None), now), ReadResult::NotReady);

        buf.ack_data(3, now).unwrap();
        assert_eq!(buf.curr_buf_size(), BufferSize::default());
    }

    #[test]
    fn test_sequence_and_msgno_assignment() {
        let now = Instant::now();
        let buf = buffer(10);
        buf.add_buffer(b"hello", &MessageControl::default(), now).unwrap();
        let override_ctrl = MessageControl {
            msgno: Some(MsgNo::new(50)),
            ..Default::default()
        };
        assert_eq!(
            buf.add_buffer(b"world", &override_ctrl, now).unwrap(),
            MsgNo::new(50)
        );
        assert_eq!(
            buf.add_buffer(b"!", &MessageControl::default(), now).unwrap(),
            MsgNo::new(51)
        );

        let first = data(buf.read_next(Some(EncryptionKeySpec::None), now));
        assert_eq!(first.seq, SeqNumber::new(100));
        assert_eq!(first.msg.boundary, PacketBoundary::Solo);
        assert_eq!(buf.next_seq(), SeqNumber::new(103));
    }

    #[test]
    fn test_empty_message_rejected() {
        let buf = buffer(10);
        assert_eq!(
            buf.add_buffer(b"", &MessageControl::default(), Instant::now()),
            Err(BufferError::EmptyMessage)
        );
    }

    #[test]
    fn test_growth() {
        let now = Instant::now();
        let buf = buffer(10);
        assert_eq!(buf.capacity(), 4);
        buf.add_buffer(&[0u8; 100], &MessageControl::default(), now).unwrap();
        assert_eq!(buf.count(), 10);
        assert_eq!(buf.capacity(), 12);
    }

    #[test]
    fn test_growth_limit() {
        let config = SendConfig {
            initial_blocks: 4,
            payload_size: 10,
            max_blocks: 8,
        };
        let buf = SendBuffer::from_config(&config, SeqNumber::new(0));
        let now = Instant::now();
        buf.add_buffer(&[0u8; 50], &MessageControl::default(), now).unwrap();
        assert_eq!(
            buf.add_buffer(&[0u8; 50], &MessageControl::default(), now),
            Err(BufferError::Exhausted)
        );
        assert_eq!(buf.count(), 5);
    }

    #[test]
    fn test_key_unavailable_keeps_position() {
        let now = Instant::now();
        let buf = buffer(10);
        buf.add_buffer(b"abc", &MessageControl::default(), now).unwrap();
        assert_eq!(buf.read_next(None, now), ReadResult::KeyUnavailable);

        let p = data(buf.read_next(Some(EncryptionKeySpec::Even), now));
        assert_eq!(&p.payload[..], b"abc");
        assert_eq!(p.msg.encryption_key, EncryptionKeySpec::Even);

        // Key flags persist for retransmission
        let r = data(buf.read_at(0, now).unwrap());
        assert_eq!(r.msg.encryption_key, EncryptionKeySpec::Even);
        assert!(r.msg.retransmitted);
    }

    #[test]
    fn test_read_at_out_of_range() {
        let now = Instant::now();
        let buf = buffer(10);
        buf.add_buffer(b"abc", &MessageControl::default(), now).unwrap();
        assert_eq!(
            buf.read_at(1, now),
            Err(BufferError::OutOfRange {
                offset: 1,
                count: 1
            })
        );
    }

    #[test]
    fn test_sequential_read_drops_expired_message() {
        let now = Instant::now();
        let buf = buffer(10);
        let ctrl = MessageControl::with_ttl(Duration::from_millis(50));
        buf.add_buffer(&[1u8; 25], &ctrl, now).unwrap();
        buf.add_buffer(b"fresh", &MessageControl::default(), now).unwrap();

        let later = now + Duration::from_millis(51);
        assert_eq!(
            buf.read_next(Some(EncryptionKeySpec::None), later),
            ReadResult::DropMessage {
                msgno: MsgNo::FIRST,
                packets: 3,
                first_seq: SeqNumber::new(100),
            }
        );
        let p = data(buf.read_next(Some(EncryptionKeySpec::None), later));
        assert_eq!(&p.payload[..], b"fresh");
    }

    #[test]
    fn test_read_at_expired_moves_cursor() {
        let now = Instant::now();
        let buf = buffer(10);
        let ctrl = MessageControl::with_ttl(Duration::from_millis(50));
        buf.add_buffer(&[1u8; 30], &ctrl, now).unwrap();
        buf.add_buffer(b"next", &MessageControl::default(), now).unwrap();

        // First block sent, the rest of the message not yet
        data(buf.read_next(Some(EncryptionKeySpec::None), now));

        let later = now + Duration::from_millis(100);
        assert_eq!(
            buf.read_at(0, later).unwrap(),
            ReadResult::DropMessage {
                msgno: MsgNo::FIRST,
                packets: 3,
                first_seq: SeqNumber::new(100),
            }
        );
        let p = data(buf.read_next(Some(EncryptionKeySpec::None), later));
        assert_eq!(p.seq, SeqNumber::new(103));
    }

    #[test]
    fn test_retransmission_equivalence() {
        let now = Instant::now();
        let buf = buffer(4);
        buf.add_buffer(b"abcdefgh", &MessageControl::default(), now).unwrap();

        let before = data(buf.read_at(1, now).unwrap());
        data(buf.read_next(Some(EncryptionKeySpec::None), now));
        let after = data(buf.read_at(1, now).unwrap());
        assert_eq!(before, after);
        assert_eq!(&after.payload[..], b"efgh");
        assert_eq!(buf.rexmit_time(1), Some(now));
        assert_eq!(buf.rexmit_time(0), None);
    }

    #[test]
    fn test_ack_moves_cursor() {
        let now = Instant::now();
        let buf = buffer(10);
        for _ in 0..3 {
            buf.add_buffer(b"x", &MessageControl::default(), now).unwrap();
        }
        buf.ack_data(2, now).unwrap();
        assert_eq!(buf.first_seq(), SeqNumber::new(102));
        let p = data(buf.read_next(Some(EncryptionKeySpec::None), now));
        assert_eq!(p.seq, SeqNumber::new(102));
        assert_eq!(
            buf.ack_data(5, now),
            Err(BufferError::InvalidAck {
                count: 5,
                available: 1
            })
        );
    }

    #[test]
    fn test_drop_late_data() {
        let now = Instant::now();
        let buf = buffer(10);
        let t0 = MessageControl {
            src_time: Some(now),
            ..Default::default()
        };
        let t1 = MessageControl {
            src_time: Some(now + Duration::from_millis(10)),
            ..Default::default()
        };
        buf.add_buffer(&[0u8; 15], &t0, now).unwrap();
        buf.add_buffer(&[0u8; 5], &t1, now).unwrap();

        let dropped = buf.drop_late_data(now + Duration::from_millis(5), now);
        assert_eq!(
            dropped,
            DropLate {
                packets: 2,
                bytes: 15,
                first_msgno: Some(MsgNo::new(2)),
            }
        );
        assert_eq!(buf.count(), 1);
        assert_eq!(buf.bytes(), 5);
        assert_eq!(buf.msgno_at(0), Some(MsgNo::new(2)));
    }

    #[test]
    fn test_input_rate_sampled_at_append_time() {
        let now = Instant::now();
        let buf = buffer(10);
        let past = MessageControl {
            src_time: Some(now - Duration::from_secs(1)),
            ..Default::default()
        };
        buf.add_buffer(&[0u8; 10], &past, now).unwrap();
        assert_eq!(buf.input_rate(), crate::stats::INPUT_RATE_INITIAL);

        buf.add_buffer(&[0u8; 10], &past, now + Duration::from_millis(600))
            .unwrap();
        let total = 10 + crate::packet::DATA_HEADER_OVERHEAD as u64;
        assert_eq!(buf.input_rate(), total * 1_000_000 / 600_000);
    }

    #[test]
    fn test_buffer_size_timespan() {
        let now = Instant::now();
        let buf = buffer(10);
        buf.add_buffer(b"a", &MessageControl::default(), now).unwrap();
        buf.add_buffer(b"b", &MessageControl::default(), now + Duration::from_millis(20))
            .unwrap();
        assert_eq!(
            buf.curr_buf_size(),
            BufferSize {
                packets: 2,
                bytes: 2,
                timespan_ms: 21
            }
        );
        assert_eq!(
            buf.buffering_delay(now + Duration::from_millis(30)),
            Duration::from_millis(30)
        );
        assert_eq!(buf.peek_next_original(), Some(now));
    }
}
