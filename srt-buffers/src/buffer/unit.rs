//! Receive units and the pool they are drawn from
//!
//! Units are preallocated so that packet arrival never allocates. A unit is
//! taken from the pool by the network reader, filled, handed to the receive
//! buffer, and goes back to the pool once the application consumed it or it
//! was dropped.

use crate::packet::{DataPacket, MsgNumber};
use crate::sequence::SeqNumber;
use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

/// Lifecycle state of a unit held by the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Holds data not yet read by the application
    Good,
    /// Read by the application before it was acknowledged
    PassAck,
    /// Marked for dropping (message drop request or decrypt failure)
    Dropped,
}

/// A packet slot drawn from a [`UnitPool`]
#[derive(Debug)]
pub struct Unit {
    packet: DataPacket,
    state: UnitState,
}

impl Unit {
    /// Fill the unit with an arrived packet
    pub fn fill(&mut self, seq: SeqNumber, msg: MsgNumber, timestamp: u32, payload: &[u8]) {
        self.packet.seq = seq;
        self.packet.msg = msg;
        self.packet.timestamp = timestamp;
        self.packet.payload.clear();
        self.packet.payload.extend_from_slice(payload);
        self.state = UnitState::Good;
    }

    pub fn packet(&self) -> &DataPacket {
        &self.packet
    }

    pub fn packet_mut(&mut self) -> &mut DataPacket {
        &mut self.packet
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: UnitState) {
        self.state = state;
    }
}

/// Fixed-size pool of receive units
///
/// Shared between the network reader acquiring units and the receive buffer
/// releasing them; both ends are lock-free.
#[derive(Debug)]
pub struct UnitPool {
    free: ArrayQueue<BytesMut>,
    size: usize,
    payload_size: usize,
}

impl UnitPool {
    /// Create a pool of `size` units with room for `payload_size` bytes each
    pub fn new(size: usize, payload_size: usize) -> Self {
        let size = size.max(1);
        let free = ArrayQueue::new(size);
        for _ in 0..size {
            let _ = free.push(BytesMut::with_capacity(payload_size));
        }
        UnitPool {
            free,
            size,
            payload_size,
        }
    }

    /// Take a free unit, or `None` when every unit is in use
    pub fn acquire(&self) -> Option<Unit> {
        let payload = self.free.pop()?;
        Some(Unit {
            packet: DataPacket {
                seq: SeqNumber::new(0),
                msg: MsgNumber::new(0),
                timestamp: 0,
                payload,
            },
            state: UnitState::Good,
        })
    }

    /// Return a unit to the pool
    pub fn release(&self, unit: Unit) {
        let mut payload = unit.packet.payload;
        payload.clear();
        if self.free.push(payload).is_err() {
            tracing::warn!(size = self.size, "unit released to a full pool");
        }
    }

    /// Total number of units
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn in_use(&self) -> usize {
        self.size - self.free.len()
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }
}
