//! Standalone reverse-proxy process: one instance per device, multiplexing
//! WDA's HTTP API and its MJPEG stream onto a single public port. Started
//! (and restarted) by the agent's supervisor, but runs as its own OS process
//! so a proxy crash never takes the supervisor down with it.

use clap::Parser;
use ios_provider_agent::reverse_proxy::{self, ProxyTargets};

#[derive(Parser, Debug)]
#[command(name = "ios-provider-proxy")]
struct Args {
    /// Public port to listen on.
    #[arg(long)]
    port: u16,

    /// Upstream WDA base URL, e.g. http://127.0.0.1:8100.
    #[arg(long)]
    wda_url: String,

    /// Upstream MJPEG base URL, e.g. http://127.0.0.1:9100.
    #[arg(long)]
    mjpeg_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], args.port));
    let targets = ProxyTargets {
        wda_url: args.wda_url,
        mjpeg_url: args.mjpeg_url,
    };

    log::info!("ios-provider-proxy listening on {addr}");
    reverse_proxy::serve(addr, targets).await
}
