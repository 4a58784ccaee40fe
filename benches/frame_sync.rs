//! Criterion benchmarks for the frame synchroniser.
//!
//! The reader task pushes every received byte through `FrameSync`, so its cost
//! per byte bounds how much line noise the driver can absorb.
//!
//! Run with: cargo bench --bench frame_sync

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dacta::protocol::{Frame, FrameSync, NUM_PORTS};

fn sample_frame(seed: u16) -> Frame {
    let mut channels = [(0u16, 0u8); NUM_PORTS];
    for (i, channel) in channels.iter_mut().enumerate() {
        *channel = ((seed + i as u16 * 97) & 0x3FF, (i as u8 * 5) & 0x3F);
    }
    Frame::from_channels(channels)
}

/// Stream of `frames` frames with `noise` garbage bytes after each one.
fn stream(frames: usize, noise: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frames * (19 + noise));
    for i in 0..frames {
        bytes.extend_from_slice(sample_frame(i as u16).as_bytes());
        bytes.extend((0..noise).map(|n| 0xA5u8.wrapping_add(n as u8)));
    }
    bytes
}

fn frame_sync_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_sync");

    for (name, noise) in [("clean", 0), ("noisy_3", 3), ("noisy_19", 19)] {
        let data = stream(1000, noise);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::new("feed", name), &data, |b, data| {
            b.iter(|| {
                let mut sync = FrameSync::new();
                let frames = sync.feed(black_box(data)).count();
                black_box(frames)
            });
        });
    }

    group.finish();
}

fn frame_decode(c: &mut Criterion) {
    let frame = sample_frame(321);
    c.bench_function("frame_channels", |b| {
        b.iter(|| black_box(black_box(&frame).channels()));
    });
    c.bench_function("frame_validate", |b| {
        b.iter(|| Frame::validate(black_box(frame.as_bytes())));
    });
}

criterion_group!(benches, frame_sync_throughput, frame_decode);
criterion_main!(benches);
