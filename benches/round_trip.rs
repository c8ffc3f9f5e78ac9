//! Request/reply benchmark suite.
//!
//! Benchmarks:
//! - Frame codec encode + decode at several payload sizes
//! - Loopback round trips through a pooled gateway, sequential and concurrent
//!
//! Run with: cargo bench --bench round_trip
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tcp_gateway::{
    BoxError, ConnectionPool, Endpoint, FrameCodec, GatewayOptions, InboundGateway, Listener,
    OutboundGateway, PoolOptions, ServerOptions, handler_fn,
};
use tokio::runtime::Runtime;
use tokio_util::codec::{Decoder, Encoder};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const PAYLOAD_SIZES: &[usize] = &[16, 1024, 64 * 1024];
const CONCURRENCY: &[usize] = &[1, 4, 16];
const POOL_CAPACITY: usize = 4;

// ============================================================================
// Benchmark: Codec
// ============================================================================

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for &size in PAYLOAD_SIZES {
        let payload = Bytes::from(vec![0xA5u8; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encode_decode", size), &payload, |b, payload| {
            let mut codec = FrameCodec::default();
            let mut buf = BytesMut::with_capacity(size + 4);
            b.iter(|| {
                codec
                    .encode(payload.clone(), &mut buf)
                    .expect("encode");
                let frame = codec.decode(&mut buf).expect("decode").expect("frame");
                black_box(frame);
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Loopback Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let (listener, gateway) = rt.block_on(setup());

    let mut group = c.benchmark_group("round_trip");

    for &concurrency in CONCURRENCY {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("send", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| {
                    let gateway = gateway.clone();
                    async move { send_batch(&gateway, concurrency).await }
                });
            },
        );
    }

    group.finish();

    rt.block_on(listener.shutdown());
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn echo(request: Bytes) -> Result<Bytes, BoxError> {
    Ok(request)
}

async fn setup() -> (Listener, OutboundGateway) {
    let inbound = InboundGateway::new(handler_fn(echo), ServerOptions::new()).expect("inbound");
    let listener = Listener::bind("127.0.0.1:0", inbound).await.expect("bind");

    let pool = ConnectionPool::connect(
        Endpoint::new("127.0.0.1", listener.port()),
        PoolOptions::new().with_capacity(POOL_CAPACITY),
    )
    .expect("pool");
    let gateway = OutboundGateway::new(Arc::new(pool), GatewayOptions::new()).expect("gateway");

    (listener, gateway)
}

async fn send_batch(gateway: &OutboundGateway, concurrency: usize) {
    let sends: Vec<_> = (0..concurrency)
        .map(|_| gateway.send(Bytes::from_static(b"ping")))
        .collect();

    for reply in futures_util::future::join_all(sends).await {
        black_box(reply.expect("reply"));
    }
}

// ============================================================================
// Criterion Setup
// ============================================================================

criterion_group!(benches, bench_codec, bench_round_trip);
criterion_main!(benches);
