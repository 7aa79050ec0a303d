//! Acknowledges every read with a backtick and broadcasts a dot to all
//! clients every 200ms. Pair it with the `ticker_client` demo.
//!
//! ```text
//! cargo run --example echo_server -- 1313
//! ```

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use mill_tcp::{ConnectionId, ConnectionRef, NetworkError, ServerHandler, TcpServer};
use tracing::{error, info};

struct Acknowledge;

impl ServerHandler for Acknowledge {
    fn on_data(&mut self, conn: &ConnectionRef, data: &[u8]) {
        print!("{}", String::from_utf8_lossy(data));
        let _ = io::stdout().flush();
        conn.write(b"`".to_vec());
    }

    fn on_connect(&mut self, conn: &ConnectionRef) {
        info!(conn_id = %conn.id(), "client connected");
    }

    fn on_disconnect(&mut self, conn_id: ConnectionId) {
        info!(%conn_id, "client disconnected");
    }

    fn on_error(&mut self, conn_id: Option<ConnectionId>, error: &NetworkError) {
        match conn_id {
            Some(id) => error!(conn_id = %id, %error, "connection error"),
            None => error!(%error, "server error"),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let port: u16 = match std::env::args().nth(1) {
        Some(arg) => arg.parse().context("port must be a number")?,
        None => 1313,
    };

    let server = Arc::new(TcpServer::bind(port, Acknowledge).context("failed to start server")?);
    info!(addr = %server.local_addr(), clients = server.connection_count(), "press Enter to stop");

    let runner = {
        let server = Arc::clone(&server);
        thread::spawn(move || server.run())
    };

    let ticking = Arc::new(AtomicBool::new(true));
    let ticker = {
        let server = Arc::clone(&server);
        let ticking = Arc::clone(&ticking);
        thread::spawn(move || {
            while ticking.load(Ordering::Relaxed) {
                server.write(b".".to_vec());
                thread::sleep(Duration::from_millis(200));
            }
        })
    };

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;

    ticking.store(false, Ordering::Relaxed);
    let _ = ticker.join();
    server.stop();
    runner
        .join()
        .map_err(|_| anyhow::anyhow!("server thread panicked"))??;

    info!("exit");
    Ok(())
}
