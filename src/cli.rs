use std::net::IpAddr;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TCP port the relay listens on. Use 0 for an ephemeral port.
    pub port: u16,

    /// Interface address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,
}
