use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use rtsp_whip_bridge::{logging, AppConfig, Backends, Supervisor};

/// Republish RTSP cameras to WHIP endpoints
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the YAML config
    #[arg(default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let args = Args::parse();

    let config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let supervisor = Supervisor::new(&config, Backends::production(&config));
    supervisor
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::warn!("failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    ExitCode::SUCCESS
}
