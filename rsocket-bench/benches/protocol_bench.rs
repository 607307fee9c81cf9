//! Frame encoding/decoding benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rsocket_protocol::{Decoder, Encoder, Frame, Payload, RequestFrame};

fn create_test_frame(payload_size: usize) -> Frame {
    let payload = Payload::new("x".repeat(payload_size)).with_metadata("bench/route");
    RequestFrame::next(1, payload).into()
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [100, 1000, 10000] {
        let frame = create_test_frame(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for size in [100, 1000, 10000] {
        let encoded = create_test_frame(size).encode().unwrap().freeze();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| black_box(Frame::decode(encoded.clone()).unwrap()));
        });
    }

    group.finish();
}

fn bench_request_stream_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_stream_encode");

    for size in [100, 1000, 10000] {
        let frame: Frame =
            RequestFrame::request_stream(1, 64, Payload::new("x".repeat(size))).into();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(Encoder::encode_frame(frame).unwrap()));
        });
    }

    group.finish();
}

fn bench_codec_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_decode");

    for size in [100, 1000, 10000] {
        let framed = Encoder::encode_frame(&create_test_frame(size)).unwrap().freeze();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &framed, |b, framed| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                decoder.extend(framed);
                black_box(decoder.decode_frame().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_codec_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_batch");

    for count in [10, 100] {
        let mut buf = Vec::new();
        for _ in 0..count {
            buf.extend_from_slice(&Encoder::encode_frame(&create_test_frame(100)).unwrap());
        }
        let buf = Bytes::from(buf);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &buf, |b, buf| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                decoder.extend_bytes(buf.clone());
                let mut decoded = 0;
                while let Some(frame) = decoder.decode_frame().unwrap() {
                    black_box(frame);
                    decoded += 1;
                }
                decoded
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_request_stream_encode,
    bench_codec_decode,
    bench_codec_batch,
);

criterion_main!(benches);
