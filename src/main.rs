// EsoxSolutions.ConnectionPool
// Async, bounded connection pool for RPC transports

// This is just a binary wrapper - the actual library is in lib.rs
// Run examples with: cargo run --example basic

use esox_connectionpool::{ConnectionPool, PoolConfig};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== EsoxSolutions.ConnectionPool ===");
    println!("See demos/ directory for usage examples");
    println!("Run: cargo run --example basic");
    println!();

    // Quick demo against a local echo endpoint
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    println!("Quick Demo:");
    let pool = ConnectionPool::connect(PoolConfig::new(address.to_string()))?;

    let mut conn = pool.borrow().await?;
    let echoed = match conn.transport_mut().write_frame(b"hello").await {
        Ok(()) => conn.transport_mut().read_frame().await.ok(),
        Err(_) => None,
    };
    match echoed {
        Some(reply) => {
            println!("  Echoed: {}", String::from_utf8_lossy(&reply));
            pool.return_connection(conn).await?;
        }
        None => pool.invalidate(conn).await?,
    }

    println!("  Idle after return: {}", pool.idle_count());
    pool.close().await?;
    Ok(())
}
