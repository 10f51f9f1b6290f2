use clap::Parser;
use csvdb::config::Config;
use csvdb::{server, Error};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::parse();

    server::run(config, async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C"),
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await
            }
        }
    })
    .await
}
