use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use srt_buffers::buffer::{MessageControl, ReadResult, RecvBuffer, SendBuffer, UnitPool};
use srt_buffers::loss::{RecvLossList, SendLossList};
use srt_buffers::packet::{EncryptionKeySpec, MsgNumber};
use srt_buffers::sequence::SeqNumber;
use std::sync::Arc;
use std::time::Instant;

fn bench_send_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_buffer");
    let payload = vec![0u8; 1316]; // 7 MPEG-TS packets
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("add_read_ack", |b| {
        let buf = SendBuffer::new(32, 1456, SeqNumber::new(0));
        let ctrl = MessageControl::default();
        let now = Instant::now();
        b.iter(|| {
            buf.add_buffer(black_box(&payload), &ctrl, now).unwrap();
            let read = buf.read_next(Some(EncryptionKeySpec::None), now);
            if let ReadResult::Data(packet) = read {
                black_box(packet);
            }
            buf.ack_data(1, now).unwrap();
        });
    });

    group.bench_function("retransmit_read", |b| {
        let buf = SendBuffer::new(1024, 1456, SeqNumber::new(0));
        let ctrl = MessageControl::default();
        let now = Instant::now();
        for _ in 0..1000 {
            buf.add_buffer(&payload, &ctrl, now).unwrap();
        }
        let mut offset = 0;
        b.iter(|| {
            let read = buf.read_at(black_box(offset), now).unwrap();
            black_box(read);
            offset = (offset + 7) % 1000;
        });
    });

    group.finish();
}

fn bench_recv_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("recv_buffer");
    let payload = vec![0u8; 1316];
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("add_ack_read", |b| {
        let pool = Arc::new(UnitPool::new(64, 1456));
        let mut buf = RecvBuffer::new(32, pool.clone());
        let mut out = vec![0u8; 1456];
        let now = Instant::now();
        let mut seq = SeqNumber::new(0);
        b.iter(|| {
            let mut unit = pool.acquire().unwrap();
            unit.fill(seq, MsgNumber::new(1), 0, &payload);
            buf.add_data(unit, 0).unwrap();
            buf.ack_data(1).unwrap();
            let msg = buf.read_msg(&mut out, now);
            black_box(msg);
            seq.increment();
        });
    });

    group.finish();
}

fn bench_loss_lists(c: &mut Criterion) {
    let mut group = c.benchmark_group("loss_list");

    group.bench_function("send_insert_pop", |b| {
        let list = SendLossList::new(8192);
        let mut base = SeqNumber::new(0);
        b.iter(|| {
            list.insert(base, base + 9);
            while let Some(seq) = list.pop_lost_seq() {
                black_box(seq);
            }
            base = base + 10;
        });
    });

    group.bench_function("recv_insert_remove", |b| {
        let mut list = RecvLossList::new(8192);
        let mut base = SeqNumber::new(0);
        b.iter(|| {
            list.insert(base, base + 9);
            for i in 0..10 {
                list.remove(base + i);
            }
            black_box(list.loss_length());
            base = base + 11;
        });
    });

    group.finish();
}

criterion_group!(benches, bench_send_cycle, bench_recv_cycle, bench_loss_lists);
criterion_main!(benches);
