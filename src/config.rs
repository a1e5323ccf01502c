//! Command line and environment configuration of the service.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use anyhow::Context;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "pdf-sigcheck")]
#[command(about = "HTTP service verifying the digital signatures of PDF files")]
#[command(version)]
pub struct Config {
    /// File listing the SHA-256 fingerprints of trusted signing
    /// certificates, one per line
    #[arg(long = "trusted-certs-sha256", env = "SIGCHECK_TRUSTED_CERTS")]
    pub trusted_certs: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "SIGCHECK_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "SIGCHECK_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Number of documents verified concurrently
    #[arg(
        long,
        env = "SIGCHECK_WORKERS",
        default_value_t = 4,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub workers: u16,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("invalid listen address {:?}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}
