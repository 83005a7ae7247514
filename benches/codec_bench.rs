//! Benchmarks for control-line encoding and in-memory pushes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use scp_push::client::Client;
use scp_push::config::Endpoint;
use scp_push::scp::{encode_file_header, receiver_command, RemoteTarget};
use scp_push::transport::memory::MemoryTransport;

/// Benchmark header and command encoding
fn bench_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoding");

    group.bench_function("file_header", |b| {
        b.iter(|| encode_file_header(black_box("0644"), black_box(1_073_741_824), black_box("release.tar.gz")))
    });

    group.bench_function("parse_target", |b| {
        b.iter(|| RemoteTarget::parse(black_box("/srv/releases/2024/app release.tar.gz")).unwrap())
    });

    group.bench_function("receiver_command_quoted", |b| {
        b.iter(|| receiver_command(black_box("/srv/my releases/it's here")))
    });

    group.finish();
}

/// Benchmark whole pushes over the loopback transport
fn bench_memory_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_push");
    let runtime = Runtime::new().unwrap();

    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        let payload = vec![b'x'; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("copy", size), &payload, |b, payload| {
            b.to_async(&runtime).iter(|| async {
                let transport = MemoryTransport::new();
                let mut client = Client::with_transport(Endpoint::default(), transport);
                client.connect().await.unwrap();
                client
                    .copy(&payload[..], "/tmp/bench.bin", "0644", payload.len() as u64)
                    .await
                    .unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encoding, bench_memory_push);
criterion_main!(benches);
