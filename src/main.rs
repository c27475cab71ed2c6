use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bgp_speaker::config::load_config;
use bgp_speaker::inst::Bgp;

#[derive(Parser)]
#[command(author, version, about = "Minimal BGP-4 speaker", long_about = None)]
struct Arg {
    #[arg(help = "Path to the YAML configuration file")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let arg = Arg::parse();
    let config = load_config(&arg.config)?;
    info!(
        asn = config.local.asn,
        router_id = %config.local.router_id,
        peers = config.peers.len(),
        "bgp-speaker started"
    );

    let mut bgp = Bgp::new(config);
    bgp.event_loop().await
}
