//! Many tasks sharing one pool

use esox_connectionpool::{ConnectionPool, PoolConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    println!("=== EsoxSolutions.ConnectionPool - Concurrent Access ===\n");

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?.to_string();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    let config = PoolConfig::new(address)
        .with_max_idle(5)
        .with_max_active(10)
        .with_idle_timeout(Duration::from_secs(120));
    let pool = ConnectionPool::connect(config)?;

    let succeeded = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();

    for index in 0..200usize {
        let pool = pool.clone();
        let succeeded = Arc::clone(&succeeded);
        let failed = Arc::clone(&failed);
        tasks.push(tokio::spawn(async move {
            let mut conn = match pool.borrow().await {
                Ok(conn) => conn,
                Err(e) => {
                    println!("   Task {}: borrow failed: {}", index, e);
                    failed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            };

            let payload = format!("request {}", index);
            let reply = match conn.transport_mut().write_frame(payload.as_bytes()).await {
                Ok(()) => conn.transport_mut().read_frame().await,
                Err(e) => Err(e),
            };

            // every fifth connection is treated as broken
            let outcome = match reply {
                Ok(_) if index % 5 != 0 => pool.return_connection(conn).await,
                Ok(_) => pool.invalidate(conn).await,
                Err(_) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    let _ = pool.invalidate(conn).await;
                    return;
                }
            };
            if outcome.is_ok() {
                succeeded.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    for task in tasks {
        task.await?;
    }

    println!("   Succeeded: {}", succeeded.load(Ordering::Relaxed));
    println!("   Failed: {}", failed.load(Ordering::Relaxed));
    println!("   Active: {}, idle: {}", pool.active_count(), pool.idle_count());

    let metrics = pool.metrics();
    println!("   Connections created: {}", metrics.connections_created);
    println!("   Connections destroyed: {}", metrics.connections_destroyed);

    pool.close().await?;
    Ok(())
}
