use std::process::ExitCode;

use clap::Parser;
use tokio::signal as os_signal;
use tokio::sync::watch;
use tracing::{error, info};

use spreadhound::app::Supervisor;
use spreadhound::cli::{self, Cli, Command};
use spreadhound::config::Config;
use spreadhound::error::Error;
use spreadhound::signal::StdinSource;

const EXIT_CONFIG: u8 = 1;
const EXIT_UNREACHABLE: u8 = 2;
const EXIT_SUPERVISOR: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config_path = cli.config_path();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config_path).await,
        Command::CheckConfig => match cli::check_config(&config_path) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{e}");
                ExitCode::from(EXIT_CONFIG)
            }
        },
        Command::ParseSignal { message } => {
            let text = match message {
                Some(text) => text,
                None => {
                    let mut buffer = String::new();
                    use std::io::Read;
                    if std::io::stdin().read_to_string(&mut buffer).is_err() {
                        return ExitCode::from(EXIT_CONFIG);
                    }
                    buffer
                }
            };
            cli::parse_signal(&text);
            ExitCode::SUCCESS
        }
    }
}

async fn run(config_path: &std::path::Path) -> ExitCode {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config {}: {e}", config_path.display());
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    config.init_logging();

    let supervisor = match Supervisor::build(config) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!(error = %e, "Failed to build subsystems");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if os_signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("spreadhound starting");
    let result = supervisor
        .run(Box::new(StdinSource::new()), shutdown_rx)
        .await;
    match result {
        Ok(()) => {
            info!("spreadhound stopped");
            ExitCode::SUCCESS
        }
        Err(Error::AllVenuesUnreachable) => {
            error!("No venue reachable at boot");
            ExitCode::from(EXIT_UNREACHABLE)
        }
        Err(Error::Config(e)) => {
            error!(error = %e, "Configuration error");
            ExitCode::from(EXIT_CONFIG)
        }
        Err(e) => {
            error!(error = %e, "Supervisor failed");
            ExitCode::from(EXIT_SUPERVISOR)
        }
    }
}
