use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use vmusb_protocol::{FifoWidth, ReadoutList, TransferAddress, Width, encode_packet};

/// A readout cycle the way a trigger-driven DAQ would build it: event
/// marker, FIFO drains of two converter modules, scaler reads, resets.
fn event_list() -> ReadoutList {
    let mut list = ReadoutList::new();
    list.add_marker(0xbde7);
    list.add_fifo_read(FifoWidth::D32, 0x0606_0000, 0x0f, 64);
    list.add_fifo_read(FifoWidth::D32, 0x0106_0000, 0x0f, 64);
    list.add_register_read(0x1c);
    list.add_register_read(0x20);
    list.add_write(Width::D16, 0xbb00_6034, 0x0e, 1);
    list
}

fn encoding(c: &mut Criterion) {
    let list = event_list();

    c.bench_function("serialize stack words", |b| {
        b.iter(|| black_box(&list).serialize())
    });

    c.bench_function("encode immediate packet", |b| {
        b.iter(|| encode_packet(TransferAddress::immediate(), black_box(&list), 0))
    });

    let ta = TransferAddress::list_load(2).expect("slot 2 is in range");
    c.bench_function("encode list-load packet", |b| {
        b.iter(|| encode_packet(ta, black_box(&list), 0x0100))
    });
}

criterion_group!(benches, encoding);
criterion_main!(benches);
