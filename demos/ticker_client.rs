//! Connects to the `echo_server` demo and sends an exclamation mark every
//! 200ms, printing whatever comes back. Keeps reconnecting while the server is
//! down.
//!
//! ```text
//! cargo run --example ticker_client -- 127.0.0.1 1313
//! ```

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use mill_tcp::{ReconnectPolicy, TcpClient, TcpClientConfig};
use tracing::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let service = args.next().unwrap_or_else(|| "1313".to_string());

    let config = TcpClientConfig::builder(host, service)
        .reconnect(ReconnectPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(5),
        ))
        .build();
    info!(remote = %config.target(), "press Enter to stop");

    let client = Arc::new(
        TcpClient::with_config(config, |data: &[u8]| {
            print!("{}", String::from_utf8_lossy(data));
            let _ = io::stdout().flush();
        })
        .context("failed to start client")?,
    );

    let runner = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.run())
    };

    let ticking = Arc::new(AtomicBool::new(true));
    let ticker = {
        let handle = client.handle();
        let ticking = Arc::clone(&ticking);
        thread::spawn(move || {
            while ticking.load(Ordering::Relaxed) {
                if handle.is_connected() {
                    handle.write(b"!".to_vec());
                }
                thread::sleep(Duration::from_millis(200));
            }
        })
    };

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;

    ticking.store(false, Ordering::Relaxed);
    let _ = ticker.join();
    client.stop();
    runner
        .join()
        .map_err(|_| anyhow::anyhow!("client thread panicked"))??;

    info!("exit");
    Ok(())
}
