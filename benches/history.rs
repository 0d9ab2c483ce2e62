use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relaychat::core::history::{prepare_outbound, sanitize, truncate};
use relaychat::core::message::Message;
use std::hint::black_box;

fn make_history(n_pairs: usize, base: &str) -> Vec<Message> {
    let mut v = Vec::with_capacity(n_pairs * 2);
    for i in 0..n_pairs {
        v.push(Message::user(format!("{base} {i}")));
        v.push(Message::assistant(base));
        // Every tenth exchange has a retried reply, leaving two assistant
        // turns in a row for the sanitizer to merge.
        if i % 10 == 0 {
            v.push(Message::assistant(base));
        }
    }
    v
}

fn bench_history(c: &mut Criterion) {
    let base = "lorem ipsum dolor sit amet consectetur adipiscing elit sed do eiusmod tempor incididunt ut labore et dolore magna aliqua";

    for &pairs in &[100usize, 1000usize] {
        let history = make_history(pairs, base);

        let mut group = c.benchmark_group(format!("history_pairs{pairs}"));
        group.throughput(Throughput::Elements(history.len() as u64));

        for &budget in &[10_000usize, 100_000usize] {
            group.bench_function(BenchmarkId::new("truncate", budget), |b| {
                b.iter(|| truncate(black_box(&history), budget))
            });
            group.bench_function(BenchmarkId::new("prepare_outbound", budget), |b| {
                b.iter(|| prepare_outbound(black_box(&history), budget))
            });
        }

        group.bench_function("sanitize_full", |b| {
            b.iter(|| sanitize(black_box(&history)))
        });

        group.finish();
    }
}

criterion_group!(benches, bench_history);
criterion_main!(benches);
