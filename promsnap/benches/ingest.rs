//! Microbenchmarks for batch ingest and selector queries.
//!
//! Run with: `cargo bench -p promsnap -- ingest`

#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use promsnap::engine::SelectorEngine;
use promsnap::materialize::Materializer;
use promsnap::observation::{Metric, MetricFamily, MetricKind, MetricValue, ObservationBatch};
use promsnap::query::QueryContext;
use promsnap::store::Store;

const BASE_TIME: i64 = 1_700_000_000_000;

/// A batch shaped like one scrape of a node: a few families, many pods.
fn node_batch(pods: u32) -> ObservationBatch {
    let mut cpu = MetricFamily::new(MetricKind::Gauge);
    let mut restarts = MetricFamily::new(MetricKind::Counter);
    for i in 0..pods {
        let pod = format!("pod-{i}");
        let labels = [("namespace", "default"), ("pod", pod.as_str())];
        cpu = cpu.with_metric(Metric::new(&labels, MetricValue::Gauge(f64::from(i) * 0.01)));
        restarts = restarts.with_metric(Metric::new(&labels, MetricValue::Counter(f64::from(i % 3))));
    }

    let mut batch = ObservationBatch::new();
    batch.insert("container_cpu_usage".to_string(), cpu);
    batch.insert("kube_pod_container_status_restarts_total".to_string(), restarts);
    batch.insert(
        "kubelet_running_pods".to_string(),
        MetricFamily::new(MetricKind::Gauge)
            .with_metric(Metric::new(&[("node", "n1")], MetricValue::Gauge(f64::from(pods)))),
    );
    batch
}

fn bench_ingest_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest/pods");

    for pods in [10, 100, 1000] {
        let store = Store::default();
        let batch = node_batch(pods);
        let mut ts = BASE_TIME;

        group.bench_with_input(BenchmarkId::from_parameter(pods), &pods, |b, _| {
            b.iter(|| {
                ts += 1_000;
                store.ingest_at(black_box(&batch), black_box(ts));
            });
        });
    }

    group.finish();
}

fn bench_ingest_at_retention_cap(c: &mut Criterion) {
    let store = Store::default();
    let batch = node_batch(100);
    let mut ts = BASE_TIME;
    for _ in 0..store.retention().cap() {
        ts += 1_000;
        store.ingest_at(&batch, ts);
    }

    c.bench_function("ingest/100_pods_full_history", |b| {
        b.iter(|| {
            ts += 1_000;
            store.ingest_at(black_box(&batch), black_box(ts));
        });
    });
}

fn bench_selector_query(c: &mut Criterion) {
    let store = Store::default();
    let batch = node_batch(1000);
    let mut ts = BASE_TIME;
    for _ in 0..100 {
        ts += 1_000;
        store.ingest_at(&batch, ts);
    }

    let engine = SelectorEngine::default();
    let materializer = Materializer::default();
    let ctx = QueryContext::new();

    let mut group = c.benchmark_group("query");
    for (name, query) in [
        ("exact", r#"container_cpu_usage{pod="pod-7"}"#),
        ("regex", r#"container_cpu_usage{pod=~"pod-1.*"}"#),
        ("range", r#"kube_pod_container_status_restarts_total[1m]"#),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| {
                store
                    .execute(&ctx, black_box(query), ts, &engine, &materializer)
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_ingest_batch,
    bench_ingest_at_retention_cap,
    bench_selector_query,
);
criterion_main!(benches);
