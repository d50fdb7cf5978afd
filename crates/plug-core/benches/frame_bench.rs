//! Criterion benchmarks for the WebSocket frame codec and session decoder.
//!
//! Run with:
//! ```bash
//! cargo bench --package plug-core --bench frame_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use plug_core::protocol::frame::{decode_frame, encode_frame, encode_frame_with_key, OpCode};
use plug_core::{Session, SessionConfig};

const PAYLOAD_SIZES: &[usize] = &[0, 125, 126, 4096, 65_536, 1 << 20];
const MASK_KEY: [u8; 4] = [0x37, 0xFA, 0x21, 0x3D];

/// Benchmarks `encode_frame` for server (unmasked) frames of increasing size.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frame");
    for &size in PAYLOAD_SIZES {
        let payload = vec![0x5Au8; size];
        group.bench_with_input(BenchmarkId::new("binary", size), &payload, |b, payload| {
            b.iter(|| encode_frame(black_box(OpCode::Binary), black_box(payload), true, false))
        });
    }
    group.finish();
}

/// Benchmarks `decode_frame` on masked client frames, which includes unmasking.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_frame");
    for &size in PAYLOAD_SIZES {
        let bytes = encode_frame_with_key(OpCode::Binary, &vec![0x5Au8; size], true, Some(MASK_KEY));
        group.bench_with_input(BenchmarkId::new("masked", size), &bytes, |b, bytes| {
            b.iter(|| decode_frame(black_box(bytes)).expect("decode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks a session draining a read buffer packed with small text frames.
fn bench_session_batch(c: &mut Criterion) {
    let mut chunk = Vec::new();
    for i in 0..100 {
        let text = format!("message number {i}");
        chunk.extend(encode_frame_with_key(OpCode::Text, text.as_bytes(), true, Some(MASK_KEY)));
    }

    c.bench_function("session_on_bytes_100_text", |b| {
        b.iter(|| {
            let mut session = Session::new(SessionConfig::default());
            session.open();
            session.on_bytes(black_box(&chunk))
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_session_batch);
criterion_main!(benches);
