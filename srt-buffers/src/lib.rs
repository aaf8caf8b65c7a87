//! SRT Reliable Delivery Buffers
//!
//! This crate implements the buffering core of SRT (Secure Reliable
//! Transport): the sender buffer that keeps data until acknowledged, the
//! receiver buffer that reorders arrivals and delivers them on the
//! timestamp-based (TSBPD) schedule, and the sender and receiver loss lists
//! that drive retransmission.
//!
//! The crate does no I/O. Every time-dependent operation takes the current
//! time as an argument.

pub mod buffer;
pub mod config;
pub mod loss;
pub mod packet;
pub mod sequence;
pub mod stats;
pub mod tsbpd;

pub use buffer::{
    BufferError, MessageControl, ReadMsg, ReadResult, RecvBuffer, SendBuffer, SendPacket, Unit,
    UnitPool,
};
pub use config::{BufferConfig, ConfigError};
pub use loss::{FreshLoss, FreshLossList, LossRange, RecvLossList, SendLossList};
pub use packet::{DataPacket, EncryptionKeySpec, MsgNumber, PacketBoundary};
pub use sequence::{MsgNo, SeqNumber};
pub use stats::BufferSize;
pub use tsbpd::{DriftTracer, TimeBase, TsbpdTime};
