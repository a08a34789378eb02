//! Request round-trip benchmarks over the in-memory duplex.
//!
//! Measures a call through the whole stack: remap, normalize, dispatch,
//! multiplexer, echo backend and back.
//!
//! Run with: cargo bench --bench round_trip
//! Results saved to: target/criterion/

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use futures_util::{SinkExt, StreamExt};
use inpage_provider::{MemoryDuplex, Provider, Request};
use serde_json::{Value, json};
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const CONCURRENCY: &[usize] = &[1, 16, 128];

// ============================================================================
// Echo Backend
// ============================================================================

/// Answers every `provider` request with its method name.
fn spawn_echo_backend(remote: MemoryDuplex) {
    tokio::spawn(async move {
        let (mut sink, mut stream) = remote.split();
        while let Some(Ok(frame)) = stream.next().await {
            if frame["name"] != "provider" {
                continue;
            }
            let data = &frame["data"];
            let reply = match data {
                Value::Array(requests) => Value::Array(requests.iter().map(echo).collect()),
                request => echo(request),
            };
            if sink
                .send(json!({"name": "provider", "data": reply}))
                .await
                .is_err()
            {
                break;
            }
        }
    });
}

fn echo(request: &Value) -> Value {
    json!({"id": request["id"], "jsonrpc": "2.0", "result": request["method"]})
}

fn provider() -> Provider {
    let (local, remote) = MemoryDuplex::pair();
    spawn_echo_backend(remote);
    Provider::new(local).expect("provider")
}

// ============================================================================
// Benchmark: Single Call
// ============================================================================

fn bench_single_call(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let provider = rt.block_on(async { provider() });

    c.bench_function("single_call", |b| {
        b.to_async(&rt).iter(|| async {
            provider
                .call(Request::new("eth_blockNumber", None))
                .await
                .expect("call")
        });
    });
}

// ============================================================================
// Benchmark: Concurrent Calls
// ============================================================================

fn bench_concurrent_calls(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let provider = rt.block_on(async { provider() });

    let mut group = c.benchmark_group("concurrent_calls");

    for &count in CONCURRENCY {
        group.bench_with_input(BenchmarkId::new("calls", count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async {
                let calls: Vec<_> = (0..count)
                    .map(|_| provider.call(Request::new("eth_chainId", None)))
                    .collect();
                futures_util::future::try_join_all(calls)
                    .await
                    .expect("calls")
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Batch
// ============================================================================

fn bench_batch(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let provider = rt.block_on(async { provider() });
    let batch = json!([
        {"method": "eth_chainId"},
        {"method": "net_version"},
        {"method": "eth_blockNumber"}
    ]);

    c.bench_function("batch_of_three", |b| {
        b.to_async(&rt).iter(|| async {
            provider
                .experimental()
                .send_batch(batch.clone())
                .await
                .expect("batch")
        });
    });
}

criterion_group!(
    benches,
    bench_single_call,
    bench_concurrent_calls,
    bench_batch
);
criterion_main!(benches);
