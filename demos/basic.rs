//! Basic usage examples for ConnectionPool

use esox_connectionpool::{BorrowContext, ConnectionPool, PoolConfig, PoolError};
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== EsoxSolutions.ConnectionPool - Basic Examples ===\n");

    let address = echo_server().await?;

    // Example 1: Borrow, call, return
    borrow_and_return(&address).await?;

    // Example 2: Non-blocking exhaustion
    fail_fast(&address).await?;

    // Example 3: Blocking with a deadline
    wait_with_deadline(&address).await?;

    // Example 4: Metrics and health
    metrics_and_health(&address).await?;

    Ok(())
}

async fn echo_server() -> std::io::Result<String> {
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
    Ok(address)
}

async fn borrow_and_return(address: &str) -> Result<(), PoolError> {
    println!("1. Borrow and Return:");
    let pool = ConnectionPool::connect(PoolConfig::new(address))?;

    let mut conn = pool.borrow().await?;
    let call = async {
        conn.transport_mut().write_frame(b"echo me").await?;
        conn.transport_mut().read_frame().await
    }
    .await;

    match call {
        Ok(reply) => {
            println!("   Reply: {}", String::from_utf8_lossy(&reply));
            pool.return_connection(conn).await?;
        }
        Err(e) => {
            println!("   Call failed: {}", e);
            pool.invalidate(conn).await?;
        }
    }

    println!("   Idle after return: {}\n", pool.idle_count());
    pool.close().await
}

async fn fail_fast(address: &str) -> Result<(), PoolError> {
    println!("2. Fail Fast When Exhausted:");
    let config = PoolConfig::new(address)
        .with_max_active(1)
        .with_block_when_exhausted(false);
    let pool = ConnectionPool::connect(config)?;

    let first = pool.borrow().await?;
    match pool.borrow().await {
        Ok(_) => println!("   Unexpectedly got a second connection"),
        Err(e) => println!("   Second borrow: {}", e),
    }
    pool.return_connection(first).await?;

    println!();
    pool.close().await
}

async fn wait_with_deadline(address: &str) -> Result<(), PoolError> {
    println!("3. Blocking Borrow With Deadline:");
    let pool = ConnectionPool::connect(PoolConfig::new(address).with_max_active(1))?;

    let first = pool.borrow().await?;
    let ctx = BorrowContext::new().with_timeout(Duration::from_millis(100));
    match pool.borrow_with(&ctx).await {
        Ok(_) => println!("   Unexpectedly got a second connection"),
        Err(e) => println!("   Second borrow: {}", e),
    }

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.borrow().await.map(|conn| conn.id()) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.return_connection(first).await?;

    if let Ok(Ok(id)) = waiter.await {
        println!("   Waiter got connection {} after return", id);
    }

    println!();
    pool.close().await
}

async fn metrics_and_health(address: &str) -> Result<(), PoolError> {
    println!("4. Metrics and Health:");
    let pool = ConnectionPool::connect(PoolConfig::new(address).with_max_active(4))?;

    for _ in 0..3 {
        let conn = pool.borrow().await?;
        pool.return_connection(conn).await?;
    }

    let health = pool.health();
    println!("   Healthy: {}", health.is_healthy());
    println!("   Utilization: {:.1}%", health.utilization * 100.0);

    let metrics = pool.metrics();
    println!("   Borrowed: {}", metrics.total_borrowed);
    println!("   Created: {}", metrics.connections_created);
    println!("   Idle: {}", metrics.idle_connections);

    println!();
    pool.close().await
}
