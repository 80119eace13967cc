//! Mock simulation gateway
//!
//! In-memory stand-in for the remote intersection simulator, speaking the
//! same `/api` routes. Seeded with two cities and four intersections; running
//! simulations advance on a wall-clock ticker.
//!
//! Usage:
//!   cargo run --bin mock-gateway -- --port 8000 --tick-ms 100

use clap::Parser;
use junction_console::infra::logging;
use junction_console::io::mock_server::{self, MockWorld};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mock-gateway")]
#[command(about = "In-memory intersection simulator for local development")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "8000")]
    port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Simulation tick period (ms)
    #[arg(long, default_value = "100")]
    tick_ms: u64,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_stderr(&args.log_level);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    let world = MockWorld::seeded().shared();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!(addr = %addr, tick_ms = %args.tick_ms, "mock_gateway_starting");

    tokio::spawn(mock_server::run_ticker(
        world.clone(),
        Duration::from_millis(args.tick_ms.max(1)),
        shutdown_rx.clone(),
    ));

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    mock_server::serve(listener, world, shutdown_rx).await
}
