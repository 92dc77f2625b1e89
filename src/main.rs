use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use codechat::{cli::Cli, relay::Relay};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let listener = TcpListener::bind(SocketAddr::new(cli.host, cli.port)).await?;
    let relay = Relay::new(listener);
    let addr = relay.local_addr()?;
    info!("relay listening on {}", addr);
    if let Err(err) = relay.run_until_ctrl_c().await {
        warn!("relay exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
