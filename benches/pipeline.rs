//! Pipeline throughput: raw emit cost, flush pressure and multi-producer
//! contention.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use blocklog::{format_type, Log};

format_type! {
    struct Tick = ("tick {}", 1);
}

fn bench_single_stream(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let log: Log = Log::new(dir.path().join("bench.log"), 1 << 22, false).unwrap();
    let tick = log.register_format::<Tick, (u64,)>();
    let mut stream = log.create_stream(1 << 16);

    let mut group = c.benchmark_group("emit");
    group.throughput(Throughput::Elements(1));
    group.bench_function("single_stream_u64", |b| {
        let mut i = 0u64;
        b.iter(|| {
            stream.emit(tick, (black_box(i),));
            i += 1;
        });
    });
    group.finish();
}

fn bench_flush_pressure(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let log: Log = Log::new(dir.path().join("bench.log"), 1 << 12, false).unwrap();
    let tick = log.register_format::<Tick, (u64,)>();
    // Tiny stream buffer: a flush every ~21 messages keeps the
    // consolidator and writer on the critical path.
    let mut stream = log.create_stream(256);

    let mut group = c.benchmark_group("emit");
    group.throughput(Throughput::Elements(1));
    group.bench_function("flush_pressure", |b| {
        let mut i = 0u64;
        b.iter(|| {
            stream.emit(tick, (black_box(i),));
            i += 1;
        });
    });
    group.finish();
}

fn bench_four_producers(c: &mut Criterion) {
    const PER_THREAD: u64 = 10_000;

    let dir = tempfile::tempdir().unwrap();
    let log: Log = Log::new(dir.path().join("bench.log"), 1 << 20, false).unwrap();
    let tick = log.register_format::<Tick, (u64,)>();

    let mut group = c.benchmark_group("emit");
    group.throughput(Throughput::Elements(4 * PER_THREAD));
    group.bench_function("four_streams", |b| {
        b.iter(|| {
            std::thread::scope(|scope| {
                for _ in 0..4 {
                    let mut stream = log.create_stream(1 << 12);
                    scope.spawn(move || {
                        for i in 0..PER_THREAD {
                            stream.emit(tick, (black_box(i),));
                        }
                    });
                }
            });
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_single_stream,
    bench_flush_pressure,
    bench_four_producers
);
criterion_main!(benches);