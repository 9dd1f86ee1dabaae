use std::sync::Arc;
use std::time::Duration;

use remote_dram::driver::{RemoteDramConfig, RemoteDramDriver};
use remote_dram::kvstore::{Driver, ReadOptions, ReadState, WriteOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} --listen <host:port> | --remote <host:port>", args[0]);
        eprintln!("Example: {} --listen 127.0.0.1:12345", args[0]);
        eprintln!("Example: {} --remote 127.0.0.1:12345", args[0]);

        std::process::exit(1);
    }

    let mut listen_addr: Option<String> = None;
    let mut remote_addr: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--listen" => {
                listen_addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--remote" => {
                remote_addr = Some(args[i + 1].clone());
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    match (listen_addr, remote_addr) {
        (Some(addr), None) => run_server(&addr).await,
        (None, Some(addr)) => run_demo_client(&addr).await,
        _ => {
            eprintln!("Exactly one of --listen and --remote must be given");
            std::process::exit(1);
        }
    }
}

/// Serves the in-memory store until Ctrl+C.
async fn run_server(listen_addr: &str) -> anyhow::Result<()> {
    tracing::info!("Starting server on {}", listen_addr);

    let config = RemoteDramConfig::server(listen_addr);
    let driver = RemoteDramDriver::open(config).await?;
    let manager = driver.manager().clone();

    // Periodic stats reporter.
    let stats_manager = manager.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            tracing::info!(
                "Serving {} keys to {} connected clients",
                stats_manager.storage().count(),
                stats_manager.connected_clients()
            );
        }
    });

    tracing::info!("Server ready, press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Ctrl+C received, shutting down");
    manager.shutdown().await;

    Ok(())
}

/// Writes a few keys to the server, reads them back, and reports what came
/// out.
async fn run_demo_client(remote_addr: &str) -> anyhow::Result<()> {
    tracing::info!("Connecting to server at {}", remote_addr);

    let config = RemoteDramConfig::client(remote_addr);
    let driver: Arc<RemoteDramDriver> = RemoteDramDriver::open(config).await?;

    let pairs: [(&[u8], &[u8]); 3] = [
        (b"hello", b"world from client!"),
        (b"test_number", b"42"),
        (b"test_tensor_data", b"10,20,30,40,50,60,70,80,90"),
    ];

    for (key, value) in pairs {
        let stamp = driver
            .write(key, Some(value.to_vec()), WriteOptions::default())
            .await?;
        tracing::info!(
            "Wrote '{}' ({} bytes, generation {:?})",
            String::from_utf8_lossy(key),
            value.len(),
            stamp.generation.as_str()
        );
    }

    for (key, expected) in pairs {
        let result = driver.read(key, ReadOptions::default()).await?;
        match result.state {
            ReadState::Value => {
                let matches = result.value == expected;
                tracing::info!(
                    "Read '{}': {} bytes ({})",
                    String::from_utf8_lossy(key),
                    result.value.len(),
                    if matches { "matches" } else { "MISMATCH" }
                );
            }
            ReadState::Missing => {
                tracing::warn!("Read '{}': missing", String::from_utf8_lossy(key));
            }
        }
    }

    let missing = driver
        .read(b"non_existent_key", ReadOptions::default())
        .await?;
    tracing::info!(
        "Read 'non_existent_key': {}",
        if missing.is_missing() {
            "missing (as expected)"
        } else {
            "unexpectedly present"
        }
    );

    driver.manager().shutdown().await;

    Ok(())
}
