// Commit-path benchmarks for the kvchain application.
//
// Covers transaction parsing, DeliverTx staging, and full block commits
// (durable write plus app-hash recomputation) at several block sizes and
// store sizes.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use kvchain_protocol::abci::types::{RequestBeginBlock, RequestDeliverTx, RequestEndBlock};
use kvchain_protocol::abci::Application;
use kvchain_protocol::storage::KvStore;
use kvchain_protocol::transaction;

fn txs(count: usize, salt: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| format!("account-{:06}=balance-{}", i, i * 31 + salt).into_bytes())
        .collect()
}

/// A fresh application whose store already holds `preload` keys.
fn setup_app(preload: usize) -> (Arc<Application>, u64) {
    let store = Arc::new(KvStore::open_temporary().expect("temp store"));
    let app = Arc::new(Application::new(store).expect("app"));
    let mut height = 0;
    if preload > 0 {
        height = 1;
        run_block(&app, height, &txs(preload, 0));
    }
    (app, height)
}

fn run_block(app: &Application, height: u64, block: &[Vec<u8>]) {
    app.begin_block(&RequestBeginBlock {
        height,
        ..Default::default()
    })
    .unwrap();
    for tx in block {
        app.deliver_tx(&RequestDeliverTx { tx: tx.clone() }).unwrap();
    }
    app.end_block(&RequestEndBlock { height }).unwrap();
    app.commit().unwrap();
}

fn bench_parse(c: &mut Criterion) {
    let tx = b"account-000042=balance-1302".to_vec();
    c.bench_function("tx/parse", |b| {
        b.iter(|| transaction::parse(&tx).unwrap());
    });
}

fn bench_deliver_tx(c: &mut Criterion) {
    let (app, height) = setup_app(0);
    app.begin_block(&RequestBeginBlock {
        height: height + 1,
        ..Default::default()
    })
    .unwrap();
    let req = RequestDeliverTx {
        tx: b"account-000042=balance-1302".to_vec(),
    };

    c.bench_function("app/deliver_tx", |b| {
        b.iter(|| app.deliver_tx(&req).unwrap());
    });
}

fn bench_commit_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("app/commit_block");
    group.sample_size(20);

    for block_size in [1, 100, 1_000] {
        group.throughput(Throughput::Elements(block_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(block_size),
            &block_size,
            |b, &n| {
                let (app, mut height) = setup_app(0);
                let mut salt = 0;
                b.iter(|| {
                    height += 1;
                    salt += 1;
                    run_block(&app, height, &txs(n, salt));
                });
            },
        );
    }

    group.finish();
}

fn bench_commit_large_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("app/commit_into_store");
    group.sample_size(10);

    for preload in [1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(preload), &preload, |b, &n| {
            let (app, mut height) = setup_app(n);
            b.iter(|| {
                height += 1;
                run_block(&app, height, &txs(10, height as usize));
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_parse,
    bench_deliver_tx,
    bench_commit_block,
    bench_commit_large_store,
);
criterion_main!(benches);
