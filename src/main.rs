// # ProxBalance
//
// Entry point: parse the CLI, bring up logging, load the configuration,
// connect to the cluster and hand over to the service loop. Fatal errors
// map to exit codes: 1 for configuration and permission problems, 2 for
// authentication and transport problems.

use clap::Parser;
use std::sync::Arc;
use tracing::error;

use proxbalance::api::{self, ClusterApi, ProxmoxClient};
use proxbalance::cli::Cli;
use proxbalance::config::Loader;
use proxbalance::error::Result;
use proxbalance::logging::LogHandle;
use proxbalance::{service, APP_NAME, VERSION};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.version {
        println!("{} version: {}", APP_NAME, VERSION);
        return;
    }

    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let log = LogHandle::init("INFO")?;

    let loader = Loader::new(cli.config.clone())?;
    let mut config = loader.load()?;
    log.set_level(&config.service.log_level);

    service::startup_delay(&config.service).await;

    let client = ProxmoxClient::connect(&config).await?;
    api::verify_permissions(&client).await?;
    let cluster: Arc<dyn ClusterApi> = Arc::new(client);

    // The client holds its own copy of the credentials.
    config.proxmox_api.scrub_secrets();

    service::run(cluster, loader, config, &cli, &log).await
}
