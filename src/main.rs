//! Fleetcmd CLI

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use tracing::error;

mod aws;

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Entrypoint for the fleetcmd CLI
#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Define application
    let matches = Command::new("fleetcmd")
        .version(crate_version())
        .about("Dispatch commands to EC2 fleets via AWS Systems Manager.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new(aws::RUN_CMD)
                .about("Dispatch a command described by a YAML configuration file and wait for it to complete on every target instance.")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .help("Path to YAML config file")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new(aws::STATUS_CMD)
                .about("Report the current status of a dispatched command.")
                .arg(
                    Arg::new("command-id")
                        .long("command-id")
                        .required(true)
                        .help("Id of the command to look up")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(
                    Arg::new("region")
                        .long("region")
                        .help("AWS region to query instead of the ambient default")
                        .value_parser(clap::value_parser!(String)),
                ),
        )
        .subcommand(
            Command::new(aws::OUTPUT_CMD)
                .about("Fetch and log the output a dispatched command persisted to S3.")
                .arg(
                    Arg::new("command-id")
                        .long("command-id")
                        .required(true)
                        .help("Id of the command whose output to fetch")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(
                    Arg::new("bucket")
                        .long("bucket")
                        .required(true)
                        .help("S3 bucket the command wrote output to")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(
                    Arg::new("prefix")
                        .long("prefix")
                        .help("Key prefix the command wrote output under")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(
                    Arg::new("region")
                        .long("region")
                        .help("AWS region to query instead of the ambient default")
                        .value_parser(clap::value_parser!(String)),
                ),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Parse subcommands
    match matches.subcommand() {
        Some((aws::RUN_CMD, matches)) => {
            let config_path = matches.get_one::<PathBuf>("config").unwrap();
            if let Err(e) = aws::run(config_path).await {
                error!(error = ?e, "failed to run command");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((aws::STATUS_CMD, matches)) => {
            let command_id = matches.get_one::<String>("command-id").unwrap();
            let region = matches.get_one::<String>("region").cloned();
            if let Err(e) = aws::status(command_id, region).await {
                error!(error = ?e, "failed to look up command");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((aws::OUTPUT_CMD, matches)) => {
            let command_id = matches.get_one::<String>("command-id").unwrap();
            let bucket = matches.get_one::<String>("bucket").unwrap();
            let prefix = matches.get_one::<String>("prefix").cloned();
            let region = matches.get_one::<String>("region").cloned();
            if let Err(e) = aws::output(command_id, bucket, prefix, region).await {
                error!(error = ?e, "failed to fetch command output");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((cmd, _)) => {
            error!(cmd, "invalid subcommand");
        }
        None => {
            error!("no subcommand provided");
        }
    }
    std::process::ExitCode::FAILURE
}
