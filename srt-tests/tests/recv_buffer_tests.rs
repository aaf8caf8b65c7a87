//! Integration tests for the receiver buffer

use srt_buffers::buffer::{RecvBuffer, Unit, UnitPool};
use srt_buffers::packet::{EncryptionKeySpec, MsgNumber, PacketBoundary};
use srt_buffers::sequence::{MsgNo, SeqNumber};
use srt_buffers::{BufferConfig, BufferError};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn unit(pool: &UnitPool, seq: u32, msgno: u32, boundary: PacketBoundary, payload: &[u8]) -> Unit {
    let mut unit = pool.acquire().expect("pool exhausted");
    let msg = MsgNumber {
        boundary,
        in_order: true,
        ..MsgNumber::new(msgno)
    };
    unit.fill(SeqNumber::new(seq), msg, 0, payload);
    unit
}

#[test]
fn test_timed_gap_reported_as_skip() {
    let pool = Arc::new(UnitPool::new(16, 64));
    let mut buf = RecvBuffer::new(8, pool.clone());
    let now = Instant::now();
    // Timestamp 0 plays at the time base, which is already in the past
    buf.set_tsbpd_mode(now - Duration::from_secs(1), Duration::from_millis(120));

    for offset in [0u32, 1, 3] {
        let u = unit(&pool, offset, offset + 1, PacketBoundary::Solo, b"data");
        buf.add_data(u, offset as usize).unwrap();
    }
    buf.ack_data(2).unwrap();

    let ready = buf.rcv_ready_msg(None, now);
    assert!(ready.ready);
    assert_eq!(ready.cur_seq, Some(SeqNumber::new(0)));

    let mut out = [0u8; 64];
    assert_eq!(buf.read_msg(&mut out, now).unwrap().seq, SeqNumber::new(0));
    assert_eq!(buf.read_msg(&mut out, now).unwrap().seq, SeqNumber::new(1));
    assert!(buf.read_msg(&mut out, now).is_none());

    let first = buf.rcv_first_msg(None, now);
    assert!(first.ready);
    assert!(first.passack);
    assert_eq!(first.skip_seq, Some(SeqNumber::new(3)));
    assert_eq!(first.cur_seq, Some(SeqNumber::new(3)));

    // The caller gives up on the gap and moves on
    buf.skip_data(1).unwrap();
    buf.ack_data(1).unwrap();
    let msg = buf.read_msg(&mut out, now).unwrap();
    assert_eq!(msg.seq, SeqNumber::new(3));
    assert_eq!(msg.msgno, MsgNo::new(4));
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn test_duplicate_add_is_noop() {
    let pool = Arc::new(UnitPool::new(16, 64));
    let mut buf = RecvBuffer::new(8, pool.clone());
    let now = Instant::now();

    buf.add_data(unit(&pool, 0, 1, PacketBoundary::Solo, b"first"), 0)
        .unwrap();
    let bytes = buf.counters().bytes();

    let err = buf
        .add_data(unit(&pool, 0, 1, PacketBoundary::Solo, b"again"), 0)
        .unwrap_err();
    assert_eq!(err, BufferError::Duplicate { offset: 0 });
    assert_eq!(buf.counters().bytes(), bytes);
    assert_eq!(pool.in_use(), 1);

    buf.ack_data(1).unwrap();
    let mut out = [0u8; 64];
    let msg = buf.read_msg(&mut out, now).unwrap();
    assert_eq!(&out[..msg.len], b"first");
}

#[test]
fn test_reordered_arrival_delivers_in_order() {
    let pool = Arc::new(UnitPool::new(32, 64));
    let mut buf = RecvBuffer::new(16, pool.clone());
    let now = Instant::now();

    let parts: [(&[u8], PacketBoundary); 3] = [
        (b"hel", PacketBoundary::First),
        (b"lo ", PacketBoundary::Subsequent),
        (b"world", PacketBoundary::Last),
    ];
    for offset in [2usize, 0, 1] {
        let (payload, boundary) = parts[offset];
        buf.add_data(unit(&pool, offset as u32, 1, boundary, payload), offset)
            .unwrap();
    }
    buf.add_data(unit(&pool, 3, 2, PacketBoundary::Solo, b"!"), 3)
        .unwrap();
    buf.ack_data(4).unwrap();

    let mut out = [0u8; 64];
    let msg = buf.read_msg(&mut out, now).unwrap();
    assert_eq!(&out[..msg.len], b"hello world");
    assert_eq!(msg.msgno, MsgNo::new(1));
    let msg = buf.read_msg(&mut out, now).unwrap();
    assert_eq!(&out[..msg.len], b"!");
    assert!(buf.read_msg(&mut out, now).is_none());
}

#[test]
fn test_drop_request_discards_message() {
    let pool = Arc::new(UnitPool::new(32, 64));
    let mut buf = RecvBuffer::new(16, pool.clone());
    let now = Instant::now();

    buf.add_data(unit(&pool, 0, 1, PacketBoundary::First, b"aa"), 0)
        .unwrap();
    buf.add_data(unit(&pool, 2, 2, PacketBoundary::Solo, b"bb"), 2)
        .unwrap();
    buf.drop_msg(1, true);

    // The missing tail of message 1 is given up and acknowledged
    buf.ack_data(3).unwrap();

    let mut out = [0u8; 64];
    let msg = buf.read_msg(&mut out, now).unwrap();
    assert_eq!(&out[..msg.len], b"bb");
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn test_undecryptable_unit_skipped_in_timed_mode() {
    let pool = Arc::new(UnitPool::new(16, 64));
    let mut buf = RecvBuffer::new(8, pool.clone());
    let now = Instant::now();
    buf.set_tsbpd_mode(now, Duration::ZERO);

    let mut locked = unit(&pool, 0, 1, PacketBoundary::Solo, b"????");
    locked.packet_mut().msg.encryption_key = EncryptionKeySpec::Odd;
    buf.add_data(locked, 0).unwrap();
    buf.add_data(unit(&pool, 1, 2, PacketBoundary::Solo, b"plain"), 1)
        .unwrap();
    buf.ack_data(2).unwrap();

    let mut out = [0u8; 64];
    let msg = buf.read_msg(&mut out, now).unwrap();
    assert_eq!(&out[..msg.len], b"plain");
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn test_window_bounds() {
    let pool = Arc::new(UnitPool::new(16, 64));
    let mut buf = RecvBuffer::new(8, pool.clone());
    assert_eq!(buf.avail_buf_size(), 7);

    for offset in 0..7 {
        let u = unit(&pool, offset as u32, offset as u32 + 1, PacketBoundary::Solo, b"x");
        buf.add_data(u, offset).unwrap();
    }
    buf.ack_data(7).unwrap();
    assert_eq!(buf.avail_buf_size(), 0);
    assert_eq!(buf.rcv_data_size(), 7);

    let late = unit(&pool, 7, 8, PacketBoundary::Solo, b"x");
    assert!(matches!(
        buf.add_data(late, 0),
        Err(BufferError::OutOfWindow { .. })
    ));
    assert!(buf.ack_data(1).is_err());

    let mut out = [0u8; 8];
    let now = Instant::now();
    while buf.read_msg(&mut out, now).is_some() {}
    assert_eq!(buf.avail_buf_size(), 7);
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn test_from_config() {
    let config = BufferConfig::default();
    let pool = Arc::new(UnitPool::new(config.recv.unit_pool_size(), 1456));
    let buf = RecvBuffer::from_config(&config, pool);
    assert_eq!(buf.capacity(), config.recv.capacity);
    assert!(!buf.is_tsbpd());
}
