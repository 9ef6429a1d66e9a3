use criterion::{Criterion, criterion_group, criterion_main};
use esox_connectionpool::{ConnectionPool, PoolConfig};
use std::time::Duration;

#[path = "../tests/common/mod.rs"]
mod common;

fn borrow_return(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    let pool = runtime.block_on(async {
        let config = PoolConfig::new("mock:9000")
            .with_max_idle(16)
            .with_max_active(16)
            .with_idle_timeout(Duration::from_secs(3600));
        ConnectionPool::new(common::MockFactory::new(), config).unwrap()
    });

    c.bench_function("borrow_return_idle", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let conn = pool.borrow().await.unwrap();
                pool.return_connection(conn).await.unwrap();
            })
        })
    });

    c.bench_function("borrow_return_contended", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let tasks: Vec<_> = (0..32)
                    .map(|_| {
                        let pool = pool.clone();
                        tokio::spawn(async move {
                            let conn = pool.borrow().await.unwrap();
                            pool.return_connection(conn).await.unwrap();
                        })
                    })
                    .collect();
                for task in tasks {
                    task.await.unwrap();
                }
            })
        })
    });

    runtime.block_on(pool.close()).unwrap();
}

criterion_group!(benches, borrow_return);
criterion_main!(benches);
