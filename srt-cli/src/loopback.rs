//! In-process loopback link
//!
//! Connects a sender and a receiver through a simulated channel that drops
//! every Nth original transmission. Each tick the sender transmits
//! retransmissions and new data, the receiver stores arrivals and detects
//! gaps, loss reports (NAKs) and acknowledgments flow back, and complete
//! messages are read out. Control traffic is delivered instantly and never
//! lost.

use crate::config::{ConfigError, LoopbackConfig};
use srt_buffers::buffer::{MessageControl, ReadResult, RecvBuffer, SendBuffer, SendPacket, UnitPool};
use srt_buffers::loss::{decode_loss_array, FreshLossList, RecvLossList, SendLossList};
use srt_buffers::packet::EncryptionKeySpec;
use srt_buffers::sequence::{MsgNo, SeqNumber};
use srt_buffers::stats::BufferSize;
use srt_buffers::BufferError;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Most loss ranges carried by one periodic report
const NAK_REPORT_LIMIT: usize = 256;

/// Slack the sender keeps beyond the receiver latency before dropping data
const SENDER_DROP_SLACK: Duration = Duration::from_secs(1);

/// Counters of a loopback run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub messages_sent: u64,
    pub packets_sent: u64,
    pub packets_retransmitted: u64,
    /// Dropped by the channel
    pub packets_lost: u64,
    pub packets_received: u64,
    /// Duplicates, belated arrivals and arrivals outside the window
    pub packets_rejected: u64,
    /// Never delivered because they were too late to play
    pub packets_skipped: u64,
    pub nak_ranges: u64,
    pub messages_dropped: u64,
    pub messages_delivered: u64,
    pub bytes_delivered: u64,
}

/// Statistics and buffer occupancy at one point in time
#[derive(Debug, Clone)]
pub struct LinkSnapshot {
    pub elapsed: Duration,
    pub stats: LinkStats,
    pub send_buffer: BufferSize,
    pub send_avg: BufferSize,
    pub input_rate: u64,
    pub send_loss: usize,
    pub recv_buffer: BufferSize,
    pub recv_loss: usize,
    pub fullness: String,
}

enum Wire {
    Data(SendPacket),
    /// Sequence range the sender gave up on
    DropRequest {
        msgno: Option<MsgNo>,
        lo: SeqNumber,
        hi: SeqNumber,
    },
}

/// A sender and a receiver joined by a lossy in-memory channel
pub struct Loopback {
    config: LoopbackConfig,
    base: Instant,
    send_buf: SendBuffer,
    send_loss: SendLossList,
    pool: Arc<UnitPool>,
    recv_buf: RecvBuffer,
    recv_loss: RecvLossList,
    fresh_loss: FreshLossList,
    channel: VecDeque<Wire>,
    /// First sequence number the receiver has not acknowledged
    ack_seq: SeqNumber,
    /// Sequence number the receiver expects next
    next_expected: SeqNumber,
    /// Sequence number of the latest original transmission
    last_sent: Option<SeqNumber>,
    transmitted: u64,
    ticks: u64,
    /// Tick at which the sender last saw its acknowledgment move
    last_ack_tick: u64,
    stats: LinkStats,
    read_buf: Vec<u8>,
}

impl Loopback {
    /// Create a link whose clock starts at `base`
    pub fn new(config: LoopbackConfig, base: Instant) -> Result<Self, ConfigError> {
        config.validate()?;

        let buffers = &config.buffers;
        let initial_seq = SeqNumber::new(config.channel.initial_seq);
        let pool = Arc::new(UnitPool::new(
            buffers.recv.unit_pool_size(),
            buffers.recv.payload_size,
        ));
        let mut recv_buf = RecvBuffer::from_config(buffers, pool.clone());
        if buffers.tsbpd.enabled {
            recv_buf.set_tsbpd_mode(base, buffers.tsbpd.latency());
        }

        tracing::debug!(
            %initial_seq,
            capacity = buffers.recv.capacity,
            tsbpd = buffers.tsbpd.enabled,
            loss_every = config.channel.loss_every,
            "loopback link created"
        );

        Ok(Loopback {
            send_buf: SendBuffer::from_config(&buffers.send, initial_seq),
            send_loss: SendLossList::new(buffers.loss.send_list_size),
            recv_loss: RecvLossList::new(buffers.loss.recv_list_size),
            fresh_loss: FreshLossList::new(),
            read_buf: vec![0u8; config.channel.message_size],
            pool,
            recv_buf,
            channel: VecDeque::new(),
            ack_seq: initial_seq,
            next_expected: initial_seq,
            last_sent: None,
            transmitted: 0,
            ticks: 0,
            last_ack_tick: 0,
            stats: LinkStats::default(),
            base,
            config,
        })
    }

    /// Hand one application message to the sender
    pub fn send(&mut self, data: &[u8], now: Instant) -> Result<MsgNo, BufferError> {
        let ctrl = MessageControl {
            ttl: self.config.channel.ttl(),
            in_order: true,
            ..Default::default()
        };
        let msgno = self.send_buf.add_buffer(data, &ctrl, now)?;
        self.stats.messages_sent += 1;
        Ok(msgno)
    }

    /// Run one exchange and return the messages delivered to the receiving
    /// application
    pub fn tick(&mut self, now: Instant) -> Vec<Vec<u8>> {
        self.ticks += 1;
        self.drop_late(now);
        self.transmit(now);
        self.receive(now);
        self.report_losses(now);
        self.acknowledge(now);
        self.deliver(now)
    }

    /// Whether everything sent was acknowledged and read
    pub fn is_idle(&self) -> bool {
        self.send_buf.count() == 0
            && self.channel.is_empty()
            && self.recv_buf.rcv_data_size() == 0
            && self.recv_buf.counters().bytes() == 0
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn snapshot(&self, now: Instant) -> LinkSnapshot {
        LinkSnapshot {
            elapsed: now.saturating_duration_since(self.base),
            stats: self.stats,
            send_buffer: self.send_buf.curr_buf_size(),
            send_avg: self.send_buf.avg_buf_size(now),
            input_rate: self.send_buf.input_rate(),
            send_loss: self.send_loss.loss_length(),
            recv_buffer: self.recv_buf.rcv_data_stats(),
            recv_loss: self.recv_loss.loss_length(),
            fullness: self.recv_buf.fullness_state(now),
        }
    }

    fn drop_late(&mut self, now: Instant) {
        let tsbpd = &self.config.buffers.tsbpd;
        if !tsbpd.enabled {
            return;
        }
        let Some(too_late) = now.checked_sub(tsbpd.latency() + SENDER_DROP_SLACK) else {
            return;
        };

        let first = self.send_buf.first_seq();
        let dropped = self.send_buf.drop_late_data(too_late, now);
        if dropped.packets == 0 {
            return;
        }

        let hi = first + (dropped.packets as u32 - 1);
        tracing::warn!(lo = %first, %hi, bytes = dropped.bytes, "sender dropped late data");
        self.send_loss.remove_up_to(hi);
        self.channel.push_back(Wire::DropRequest {
            msgno: None,
            lo: first,
            hi,
        });
    }

    fn transmit(&mut self, now: Instant) {
        self.check_ack_stall();

        while let Some(seq) = self.send_loss.pop_lost_seq() {
            let offset = self.send_buf.first_seq().distance_to(seq);
            if offset < 0 {
                continue;
            }
            match self.send_buf.read_at(offset as usize, now) {
                Ok(ReadResult::Data(packet)) => {
                    self.stats.packets_retransmitted += 1;
                    self.put_on_wire(packet);
                }
                Ok(ReadResult::DropMessage {
                    msgno,
                    packets,
                    first_seq,
                }) => self.request_drop(msgno, first_seq, packets),
                Ok(_) => {}
                Err(e) => tracing::warn!(%seq, error = %e, "retransmission skipped"),
            }
        }

        loop {
            match self.send_buf.read_next(Some(EncryptionKeySpec::None), now) {
                ReadResult::Data(packet) => {
                    self.stats.packets_sent += 1;
                    self.last_sent = Some(packet.seq);
                    self.put_on_wire(packet);
                }
                ReadResult::DropMessage {
                    msgno,
                    packets,
                    first_seq,
                } => self.request_drop(msgno, first_seq, packets),
                ReadResult::NotReady | ReadResult::KeyUnavailable => break,
            }
        }
    }

    /// Queue everything sent but unacknowledged for retransmission when the
    /// acknowledgment has not moved for a loss report period
    ///
    /// Recovers a lost tail, which the receiver cannot see as a gap.
    fn check_ack_stall(&mut self) {
        let period = self.config.channel.nak_period_ticks.max(1);
        if self.ticks - self.last_ack_tick < period || self.send_buf.count() == 0 {
            return;
        }
        let Some(hi) = self.last_sent else {
            return;
        };
        let lo = self.send_buf.first_seq();
        if hi.lt(lo) {
            return;
        }

        tracing::debug!(%lo, %hi, "acknowledgment stalled, retransmitting");
        self.send_loss.insert(lo, hi);
        self.last_ack_tick = self.ticks;
    }

    fn request_drop(&mut self, msgno: MsgNo, first_seq: SeqNumber, packets: usize) {
        let hi = first_seq + (packets.max(1) as u32 - 1);
        self.stats.messages_dropped += 1;
        self.send_loss.remove_up_to(hi);
        self.channel.push_back(Wire::DropRequest {
            msgno: Some(msgno),
            lo: first_seq,
            hi,
        });
    }

    fn put_on_wire(&mut self, packet: SendPacket) {
        self.transmitted += 1;
        let loss_every = self.config.channel.loss_every;
        if loss_every > 0 && !packet.msg.retransmitted && self.transmitted % loss_every == 0 {
            tracing::trace!(seq = %packet.seq, "channel dropped packet");
            self.stats.packets_lost += 1;
            return;
        }
        self.channel.push_back(Wire::Data(packet));
    }

    fn receive(&mut self, now: Instant) {
        while let Some(wire) = self.channel.pop_front() {
            match wire {
                Wire::Data(packet) => self.on_data(packet, now),
                Wire::DropRequest { msgno, lo, hi } => self.on_drop_request(msgno, lo, hi, now),
            }
        }
    }

    fn on_data(&mut self, packet: SendPacket, now: Instant) {
        let offset = self.ack_seq.distance_to(packet.seq);
        if offset < 0 {
            tracing::trace!(seq = %packet.seq, "belated packet");
            self.stats.packets_rejected += 1;
            return;
        }
        let offset = offset as usize;
        if offset >= self.recv_buf.avail_buf_size() {
            tracing::debug!(seq = %packet.seq, offset, "no room in receive window");
            self.stats.packets_rejected += 1;
            return;
        }
        let Some(mut unit) = self.pool.acquire() else {
            tracing::warn!(seq = %packet.seq, "unit pool exhausted");
            self.stats.packets_rejected += 1;
            return;
        };

        if packet.seq.gt(self.next_expected) {
            self.on_loss_detected(self.next_expected, packet.seq.prev(), now);
        }
        if packet.seq.ge(self.next_expected) {
            self.next_expected = packet.seq.next();
        } else {
            self.recv_loss.remove(packet.seq);
            self.fresh_loss.remove_one(packet.seq);
        }

        let timestamp = packet.origin_time.saturating_duration_since(self.base).as_micros() as u32;
        unit.fill(packet.seq, packet.msg, timestamp, &packet.payload);
        match self.recv_buf.add_data(unit, offset) {
            Ok(()) => self.stats.packets_received += 1,
            Err(e) => {
                tracing::debug!(seq = %packet.seq, error = %e, "arrival rejected");
                self.stats.packets_rejected += 1;
            }
        }
    }

    fn on_drop_request(&mut self, msgno: Option<MsgNo>, lo: SeqNumber, hi: SeqNumber, now: Instant) {
        if lo.gt(self.next_expected) {
            self.on_loss_detected(self.next_expected, lo.prev(), now);
        }
        self.recv_loss.remove_range(lo, hi);
        self.fresh_loss.revoke_range(lo, hi);
        if let Some(msgno) = msgno {
            self.recv_buf.drop_msg(msgno.as_raw(), true);
        }
        if hi.ge(self.next_expected) {
            self.next_expected = hi.next();
        }
    }

    fn on_loss_detected(&mut self, lo: SeqNumber, hi: SeqNumber, now: Instant) {
        self.recv_loss.insert(lo, hi);
        let ttl = self.config.buffers.loss.reorder_tolerance;
        if ttl > 0 {
            tracing::trace!(%lo, %hi, ttl, "gap held back for reordering");
            self.fresh_loss.push(lo, hi, ttl, now);
        } else {
            self.nak(lo, hi);
        }
    }

    fn nak(&mut self, lo: SeqNumber, hi: SeqNumber) {
        self.stats.nak_ranges += 1;
        let added = self.send_loss.insert(lo, hi);
        tracing::trace!(%lo, %hi, added, "loss reported");
    }

    fn report_losses(&mut self, _now: Instant) {
        for range in self.fresh_loss.age() {
            self.nak(range.start, range.end);
        }

        let period = self.config.channel.nak_period_ticks;
        if period == 0 || self.ticks % period != 0 || self.recv_loss.is_empty() {
            return;
        }
        let report = self.recv_loss.loss_array(NAK_REPORT_LIMIT);
        for range in decode_loss_array(&report) {
            self.nak(range.start, range.end);
        }
    }

    fn acknowledge(&mut self, now: Instant) {
        let ack_point = self
            .recv_loss
            .first_lost_seq()
            .unwrap_or(self.next_expected);
        let count = self.ack_seq.distance_to(ack_point);
        if count > 0 {
            match self.recv_buf.ack_data(count as usize) {
                Ok(_) => self.ack_seq = ack_point,
                Err(e) => tracing::warn!(%ack_point, error = %e, "acknowledgment rejected"),
            }
        }

        let acked = self.send_buf.first_seq().distance_to(self.ack_seq);
        if acked > 0 {
            match self.send_buf.ack_data(acked as usize, now) {
                Ok(()) => self.last_ack_tick = self.ticks,
                Err(e) => {
                    tracing::warn!(ack = %self.ack_seq, error = %e, "sender acknowledgment rejected")
                }
            }
        }
        self.send_loss.remove_up_to(self.ack_seq.prev());
    }

    fn deliver(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut delivered = Vec::new();
        loop {
            match self.recv_buf.read_msg(&mut self.read_buf, now) {
                Some(msg) => {
                    self.stats.messages_delivered += 1;
                    self.stats.bytes_delivered += msg.len as u64;
                    delivered.push(self.read_buf[..msg.len].to_vec());
                }
                None => {
                    if !self.recv_buf.is_tsbpd() || !self.skip_too_late(now) {
                        break;
                    }
                }
            }
        }
        self.recv_buf.update_avg_data_size(now);
        delivered
    }

    /// Give up on lost packets once the packet after them is due
    fn skip_too_late(&mut self, now: Instant) -> bool {
        let first = self.recv_buf.rcv_first_msg(None, now);
        let skip = match first.skip_seq {
            Some(skip) if first.ready && first.passack => skip,
            _ => return false,
        };
        let count = self.ack_seq.distance_to(skip);
        if count <= 0 {
            return false;
        }

        tracing::warn!(from = %self.ack_seq, to = %skip, "skipping packets lost beyond latency");
        if let Err(e) = self.recv_buf.skip_data(count as usize) {
            tracing::warn!(error = %e, "skip rejected");
            return false;
        }
        self.recv_loss.remove_up_to(skip.prev());
        self.fresh_loss.revoke_range(self.ack_seq, skip.prev());
        self.stats.packets_skipped += count as u64;
        self.ack_seq = skip;
        if skip.gt(self.next_expected) {
            self.next_expected = skip;
        }
        self.acknowledge(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(config: LoopbackConfig, messages: usize) -> (Vec<u8>, Vec<u8>, LinkStats) {
        let base = Instant::now();
        let tick = config.channel.tick();
        let size = config.channel.message_size;
        let per_tick = config.channel.messages_per_tick;
        let mut link = Loopback::new(config, base).unwrap();

        let input: Vec<u8> = (0..messages * size).map(|i| (i % 251) as u8).collect();
        let mut chunks = input.chunks(size);
        let mut output = Vec::new();
        let mut now = base;

        for _ in 0..100_000 {
            for chunk in chunks.by_ref().take(per_tick) {
                link.send(chunk, now).unwrap();
            }
            for msg in link.tick(now) {
                output.extend_from_slice(&msg);
            }
            now += tick;
            if chunks.len() == 0 && link.is_idle() {
                break;
            }
        }
        (input, output, link.stats())
    }

    fn lossy(loss_every: u64, tsbpd: bool) -> LoopbackConfig {
        let mut config = LoopbackConfig::default();
        config.channel.loss_every = loss_every;
        config.buffers.tsbpd.enabled = tsbpd;
        config.buffers.recv.capacity = 2048;
        config
    }

    #[test]
    fn test_lossless_transfer() {
        let (input, output, stats) = run(lossy(0, false), 50);
        assert_eq!(output, input);
        assert_eq!(stats.packets_retransmitted, 0);
        assert_eq!(stats.messages_delivered, 50);
    }

    #[test]
    fn test_recovers_losses() {
        let (input, output, stats) = run(lossy(5, false), 200);
        assert_eq!(output, input);
        assert!(stats.packets_lost > 0);
        assert!(stats.packets_retransmitted >= stats.packets_lost);
    }

    #[test]
    fn test_recovers_losses_with_tsbpd() {
        let (input, output, stats) = run(lossy(7, true), 200);
        assert_eq!(output, input);
        assert_eq!(stats.packets_skipped, 0);
    }

    #[test]
    fn test_multi_packet_messages() {
        let mut config = lossy(3, false);
        config.channel.message_size = 4000;
        config.channel.messages_per_tick = 2;
        let (input, output, stats) = run(config, 30);
        assert_eq!(output, input);
        assert_eq!(stats.messages_delivered, 30);
    }

    #[test]
    fn test_reorder_tolerance_delays_reports() {
        let mut config = lossy(4, false);
        config.buffers.loss.reorder_tolerance = 3;
        let (input, output, _) = run(config, 100);
        assert_eq!(output, input);
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut config = lossy(6, true);
        config.channel.initial_seq = srt_buffers::sequence::MAX_SEQ_NUMBER - 50;
        let (input, output, _) = run(config, 120);
        assert_eq!(output, input);
    }
}
