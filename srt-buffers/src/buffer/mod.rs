//! Send and receive data buffers
//!
//! The send buffer keeps outbound application data until the peer
//! acknowledges it; the receive buffer reorders arrivals in a fixed window of
//! slots and hands complete messages to the application, optionally on the
//! TSBPD schedule.

mod receive;
mod send;
mod unit;

pub use receive::{FirstMsg, ReadMsg, ReadingState, ReadyInfo, RecvBuffer, RecvCounters};
pub use send::{DropLate, MessageControl, ReadResult, SendBuffer, SendPacket};
pub use unit::{Unit, UnitPool, UnitState};

use thiserror::Error;

/// Buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Send buffer cannot grow any further")]
    Exhausted,

    #[error("Offset {offset} beyond the {count} buffered blocks")]
    OutOfRange { offset: usize, count: usize },

    #[error("Slot at offset {offset} is already occupied")]
    Duplicate { offset: usize },

    #[error("Offset {offset} outside the receive window ({available} slots available)")]
    OutOfWindow { offset: usize, available: usize },

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Cannot acknowledge {count} blocks, only {available} buffered")]
    InvalidAck { count: usize, available: usize },
}
