//! Sample decoder benchmarks.
//!
//! The decoder runs inside every control step, so it has to stay cheap:
//! target well under a microsecond for a full 30-byte sample.

use criterion::{Criterion, criterion_group, criterion_main};
use kiln_devices::decode::decode;
use std::hint::black_box;

/// A realistic 30-byte sample: five sections with mixed signs/exponents.
fn sample_buffer() -> [u8; 30] {
    let mut buf = [0u8; 30];
    let sections: [(u8, u32); 5] = [
        (0x00, 7),
        (0x01, 215),
        (0x0A, 1234),
        (0x00, 0),
        (0x02, 29_877),
    ];
    for (i, (flags, digits)) in sections.iter().enumerate() {
        let s = &mut buf[i * 6..(i + 1) * 6];
        s[1] = *flags;
        s[2..6].copy_from_slice(&digits.to_be_bytes());
    }
    buf
}

fn bench_decode_sample(c: &mut Criterion) {
    let buf = sample_buffer();
    c.bench_function("decode_30_byte_sample", |b| {
        b.iter(|| decode(black_box(&buf)).unwrap());
    });
}

fn bench_decode_single_section(c: &mut Criterion) {
    let buf = [0x00, 0x08, 0x00, 0x00, 0x27, 0x10];
    c.bench_function("decode_single_section", |b| {
        b.iter(|| decode(black_box(&buf)).unwrap());
    });
}

criterion_group!(benches, bench_decode_sample, bench_decode_single_section);
criterion_main!(benches);
