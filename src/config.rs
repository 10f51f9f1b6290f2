use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const DEFAULT_PORT: u16 = 9090;

#[derive(Parser, Debug, Clone)]
#[command(name = "csvdb", about = "Serve SELECT queries over directories of CSV files")]
pub struct Config {
    /// The address to listen on
    #[arg(long, env = "CSVDB_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    /// The port to listen on
    #[arg(short, long, env = "CSVDB_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding one subdirectory of CSV files per table
    #[arg(short, long, env = "CSVDB_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Seconds a cached query result stays valid
    #[arg(long, env = "CSVDB_CACHE_TTL", default_value_t = 60)]
    pub cache_ttl: u64,

    /// Maximum number of connections served at once; unlimited when unset
    #[arg(long, env = "CSVDB_MAX_CONNECTIONS", value_parser = parse_max_connections)]
    pub max_connections: Option<usize>,
}

impl Config {
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }
}

/// Accepts caps from 1 up to what a `Semaphore` can hold.
fn parse_max_connections(value: &str) -> Result<usize, String> {
    let max: usize = value.parse().map_err(|e| format!("{e}"))?;
    if (1..=Semaphore::MAX_PERMITS).contains(&max) {
        Ok(max)
    } else {
        Err(format!("must be between 1 and {}", Semaphore::MAX_PERMITS))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("data"),
            cache_ttl: 60,
            max_connections: None,
        }
    }
}
