use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use fittrack::{aggregate, aggregate_all, decode_int, LedgerEntry, LedgerStore, Nutrients, UserScope};

/// A ledger spread over `days` consecutive January/February days.
fn ledger(entries: usize, days: usize) -> Vec<LedgerEntry> {
    (0..entries)
        .map(|i| {
            let day = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).expect("Should be a valid date")
                + chrono::Duration::days((i % days) as i64);
            LedgerEntry::builder(day.format("%Y-%m-%d").to_string(), "meal")
                .nutrients(Nutrients::new(250.0, 12.0, 8.0, 30.0))
                .build()
                .expect("Should build entry")
        })
        .collect()
}

/// Benchmark single-day aggregation over growing ledgers
fn bench_aggregate_day(c: &mut Criterion) {
    for size in [100usize, 1_000, 10_000].iter() {
        let entries = ledger(*size, 30);
        c.bench_with_input(BenchmarkId::new("aggregate_day", size), &entries, |b, entries| {
            b.iter(|| aggregate(entries, "2024-01-15"))
        });
    }
}

/// Benchmark full per-day rebuild
fn bench_aggregate_all(c: &mut Criterion) {
    for size in [100usize, 1_000, 10_000].iter() {
        let entries = ledger(*size, 30);
        c.bench_with_input(BenchmarkId::new("aggregate_all", size), &entries, |b, entries| {
            b.iter(|| aggregate_all(entries))
        });
    }
}

/// Benchmark JSON serialization of the ledger
fn bench_ledger_serialization(c: &mut Criterion) {
    let entries = ledger(1_000, 30);
    let json = serde_json::to_string(&entries).expect("Should serialize");

    c.bench_function("ledger_serialization", |b| {
        b.iter(|| serde_json::to_string(&entries).expect("Should serialize"))
    });

    c.bench_function("ledger_deserialization", |b| {
        b.iter(|| serde_json::from_str::<Vec<LedgerEntry>>(&json).expect("Should deserialize"))
    });
}

/// Benchmark an append, which rewrites the ledger and the aggregate cache
fn bench_append(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Should create tokio runtime");
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let store = LedgerStore::new(dir.path());
    let scope = UserScope::new("bench").expect("Should create scope");
    let entry = ledger(1, 1).remove(0);

    c.bench_function("ledger_append", |b| {
        b.to_async(&rt)
            .iter(|| async { store.append(&scope, entry.clone()).await.expect("Should append") })
    });
}

/// Benchmark frame decoding
fn bench_decode(c: &mut Criterion) {
    c.bench_function("decode_int_valid", |b| b.iter(|| decode_int("128")));
    c.bench_function("decode_int_malformed", |b| b.iter(|| decode_int("n/a")));
}

criterion_group!(
    benches,
    bench_aggregate_day,
    bench_aggregate_all,
    bench_ledger_serialization,
    bench_append,
    bench_decode
);
criterion_main!(benches);
