//! End-to-end requester/responder benchmarks over an in-memory transport.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::stream::{self, StreamExt};
use rsocket_core::{
    Connection, ConnectionConfig, EmptyRSocket, LocalTransport, Payload, RSocketError,
    RequestHandler, Side,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

struct TestSetup {
    client: Connection,
    _server: Connection,
}

fn setup_pair(rt: &Runtime) -> TestSetup {
    let _guard = rt.enter();
    let handler = RequestHandler::builder()
        .request_response(|payload| async move { Ok::<_, RSocketError>(payload) })
        .request_stream(|payload| {
            let count: usize = payload.data_utf8().and_then(|s| s.parse().ok()).unwrap_or(0);
            stream::iter((0..count).map(|_| Ok(Payload::from("item")))).boxed()
        })
        .request_channel(|initial, payloads| {
            stream::once(async move { Ok(initial) })
                .chain(payloads)
                .boxed()
        })
        .build();

    let (a, b) = LocalTransport::pair();
    let client = Connection::start(
        Side::Client,
        a,
        ConnectionConfig::default(),
        Arc::new(EmptyRSocket),
    );
    let server = Connection::start(Side::Server, b, ConnectionConfig::default(), Arc::new(handler));

    TestSetup {
        client,
        _server: server,
    }
}

fn bench_request_response(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_pair(&rt);
    let requester = setup.client.requester();

    let mut group = c.benchmark_group("e2e_request_response");

    for size in [16, 1024, 16384] {
        let payload = Payload::new("x".repeat(size));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.to_async(&rt).iter(|| async {
                black_box(requester.request_response(payload.clone()).await.unwrap())
            });
        });
    }

    group.finish();
}

fn bench_request_stream(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_pair(&rt);
    let requester = setup.client.requester();

    let mut group = c.benchmark_group("e2e_request_stream");

    for count in [10, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async {
                let items: Vec<_> = requester
                    .request_stream(Payload::from(count.to_string()))
                    .prefetch(64)
                    .collect()
                    .await;
                black_box(items.len())
            });
        });
    }

    group.finish();
}

fn bench_request_channel(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_pair(&rt);
    let requester = setup.client.requester();

    let mut group = c.benchmark_group("e2e_request_channel");
    group.throughput(Throughput::Elements(100));

    group.bench_function("echo_100", |b| {
        b.to_async(&rt).iter(|| async {
            let outbound = stream::iter((0..100).map(|_| Ok(Payload::from("item")))).boxed();
            let items: Vec<_> = requester.request_channel(outbound).collect().await;
            black_box(items.len())
        });
    });

    group.finish();
}

fn bench_concurrent_requests(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_pair(&rt);

    let mut group = c.benchmark_group("e2e_concurrent");

    for concurrency in [1, 10, 100] {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| {
                    let requester = setup.client.requester();
                    async move {
                        let requests = (0..concurrency)
                            .map(|_| requester.request_response(Payload::from("ping")));
                        black_box(futures::future::join_all(requests).await)
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_request_response,
    bench_request_stream,
    bench_request_channel,
    bench_concurrent_requests,
);

criterion_main!(benches);
