//! Binary entry point: loads `PbxConfig` from the path given as the first
//! CLI argument (or `pbx.toml` in the working directory), then builds and
//! runs the server until the process is signalled to stop.

use std::path::PathBuf;

use tracing::{error, info};

use pbx_core::config::PbxConfig;
use pbx_core::server::PbxServer;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config_path = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("pbx.toml"));
    let config = match PbxConfig::load(&config_path).await {
        Ok(config) => config,
        Err(e) => {
            info!(path = %config_path.display(), error = %e, "no config file found, using defaults");
            PbxConfig::default()
        }
    };

    let server = match PbxServer::build(config).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to build PBX server");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!(error = %e, "PBX server exited with an error");
        std::process::exit(1);
    }
}
