//! Benchmarks for the perftest metrics engine
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use perftest::exposition;
use perftest::query::{parse_query, EngineConfig, Evaluator};
use perftest::storage::{Labels, Store, StoreConfig, METRIC_NAME};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

const VHOSTS: usize = 50;
const TICKS: i64 = 360;
const STEP_MS: i64 = 10_000;

/// A scrape of `n` request counters plus a few gauges
fn payload(n: usize, tick: i64) -> String {
    let mut out = String::from("# TYPE galeb_http_requests_total counter\n");
    for i in 0..n {
        out.push_str(&format!(
            "galeb_http_requests_total{{virtualhost=\"galeb-test-{}\",status=\"200\"}} {}\n",
            i,
            tick * (i as i64 + 1)
        ));
    }
    out.push_str("# TYPE process_open_fds gauge\nprocess_open_fds 128\n");
    out.push_str("jvm_memory_bytes_used{area=\"heap\"} 1.2e8\n");
    out.push_str("jvm_memory_bytes_max{area=\"heap\"} 5.12e8\n");
    out
}

fn populated_store(rt: &Runtime) -> Arc<Store> {
    let store = Arc::new(Store::new(StoreConfig::default()));
    rt.block_on(async {
        for tick in 0..TICKS {
            let ts = tick * STEP_MS;
            let mut appender = store.begin_append().await.unwrap();
            for i in 0..VHOSTS {
                let labels = Labels::new()
                    .with(METRIC_NAME, "galeb_http_requests_total")
                    .with("virtualhost", format!("galeb-test-{}", i));
                appender.add(labels, ts, (tick * (i as i64 + 1)) as f64).unwrap();
            }
            appender.commit().unwrap();
        }
    });
    store
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("exposition");

    for size in [10, 100, 1000] {
        let body = payload(size, 42);
        group.throughput(Throughput::Elements(size as u64 + 3));

        group.bench_function(format!("parse_text_{}", size), |b| {
            b.iter(|| {
                exposition::parse(black_box(body.as_bytes()), "text/plain; version=0.0.4", 0)
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_append(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("storage");
    let scrape = exposition::parse(payload(100, 1).as_bytes(), "", 0).unwrap();
    group.throughput(Throughput::Elements(scrape.samples.len() as u64));

    group.bench_function("append_scrape_100", |b| {
        let store = Store::new(StoreConfig::default());
        let mut ts = 0i64;
        b.iter(|| {
            ts += STEP_MS;
            rt.block_on(async {
                let mut appender = store.begin_append().await.unwrap();
                for sample in &scrape.samples {
                    appender.add(sample.labels.clone(), ts, sample.value).unwrap();
                }
                appender.commit().unwrap()
            })
        });
    });

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = populated_store(&rt);
    let evaluator = Evaluator::new(store, EngineConfig::default());
    let end = (TICKS - 1) * STEP_MS;

    let mut group = c.benchmark_group("query");

    let by_vhost = concat!(
        r#"sum(rate(galeb_http_requests_total{virtualhost=~"galeb-test-.*"}[1m]))"#,
        " by (virtualhost)"
    );
    group.bench_function("parse_query", |b| {
        b.iter(|| parse_query(black_box(by_vhost)).unwrap())
    });

    group.bench_function("instant_sum_rate", |b| {
        b.iter(|| {
            rt.block_on(evaluator.instant_query(
                black_box("sum(rate(galeb_http_requests_total[1m])) by (virtualhost)"),
                end,
            ))
            .unwrap()
        })
    });

    group.bench_function("range_sum_rate_1h", |b| {
        b.iter(|| {
            rt.block_on(evaluator.range_query(
                black_box("sum(rate(galeb_http_requests_total[1m]))"),
                0,
                end,
                Duration::from_secs(15),
            ))
            .unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_parse, bench_append, bench_query);
criterion_main!(benches);
