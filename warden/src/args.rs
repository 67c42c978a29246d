use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Policy-enforcing proxy for LLM APIs.
#[derive(Debug, Parser)]
#[command(name = "warden", version)]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short, long, env = "WARDEN_CONFIG", default_value = "warden.toml")]
    pub config: PathBuf,

    /// Listen address override.
    #[arg(short, long, env = "WARDEN_LISTEN_ADDRESS")]
    pub listen_address: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "server=debug,pipeline=debug".
    #[arg(long, env = "WARDEN_LOG", default_value = "info")]
    pub log_filter: String,
}
