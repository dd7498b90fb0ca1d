//! Command line and environment configuration for the server binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

/// Server settings, read from flags with environment fallbacks.
#[derive(Debug, Clone, Parser)]
#[command(name = "media-range", version, about = "Serve media files with HTTP Range support")]
pub struct ServerConfig {
    /// Directory the `f` query parameter is resolved against
    #[arg(long, env = "BASE_ASSET_PATH", default_value = "./assets")]
    pub base_dir: PathBuf,

    /// Port to listen on
    #[arg(long, env = "HTTP_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "HTTP_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}
