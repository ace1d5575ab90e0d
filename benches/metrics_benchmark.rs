//! Benchmarks for the per-snapshot hot path

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use depth_pulse::orderbook::{imbalance, spread, BookMetrics};
use depth_pulse::{parse_snapshot, OrderbookSnapshot, PriceLevel, SpreadHistory, SpreadSample};
use rust_decimal::Decimal;
use std::str::FromStr;

fn create_snapshot(levels: usize) -> OrderbookSnapshot {
    let bids: Vec<PriceLevel> = (0..levels)
        .map(|i| PriceLevel {
            price: Decimal::from(50000 - i as i64),
            quantity: Decimal::from_str("1.5").unwrap(),
        })
        .collect();

    let asks: Vec<PriceLevel> = (0..levels)
        .map(|i| PriceLevel {
            price: Decimal::from(50001 + i as i64),
            quantity: Decimal::from_str("1.5").unwrap(),
        })
        .collect();

    OrderbookSnapshot::new(bids, asks, Utc::now())
}

fn create_payload(levels: usize) -> String {
    let side = |base: i64, dir: i64| {
        (0..levels as i64)
            .map(|i| format!(r#"["{}.00","1.25"]"#, base + dir * i))
            .collect::<Vec<_>>()
            .join(",")
    };
    format!(
        r#"{{"lastUpdateId":1000,"bids":[{}],"asks":[{}]}}"#,
        side(50000, -1),
        side(50001, 1)
    )
}

fn benchmark_parse(c: &mut Criterion) {
    let payload = create_payload(20);

    c.bench_function("parse_depth20", |b| {
        b.iter(|| parse_snapshot(black_box(&payload), 20, Utc::now()))
    });
}

fn benchmark_metrics_calculation(c: &mut Criterion) {
    let snapshot = create_snapshot(20);

    c.bench_function("calculate_spread", |b| {
        b.iter(|| black_box(spread(&snapshot)))
    });

    c.bench_function("calculate_imbalance", |b| {
        b.iter(|| black_box(imbalance(&snapshot)))
    });

    c.bench_function("book_metrics", |b| {
        b.iter(|| black_box(BookMetrics::from_snapshot(&snapshot)))
    });
}

fn benchmark_history_push(c: &mut Criterion) {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    c.bench_function("history_push_burst", |b| {
        b.iter(|| {
            let mut history = SpreadHistory::default();
            for i in 0..1200 {
                history.push(SpreadSample::new(
                    start + Duration::milliseconds(i * 100),
                    Decimal::ONE,
                ));
            }
            black_box(history.len())
        })
    });
}

criterion_group!(
    benches,
    benchmark_parse,
    benchmark_metrics_calculation,
    benchmark_history_push
);
criterion_main!(benches);
