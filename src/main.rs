use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use xmlsvc::cli::{self, Cli, Command};
use xmlsvc::config::ConfigManager;
use xmlsvc::node::Payload;
use xmlsvc::output::Output;
use xmlsvc::Client;

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.verbosity().log_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = ConfigManager::load(&cli.overrides())
        .await
        .context("Failed to load configuration")?;
    debug!(url = %config.endpoint_url(), "Configuration loaded");

    let client = Client::new(config).context("Failed to create client")?;
    let output = Output::new(cli.verbosity(), cli.format);

    match &cli.command {
        Command::Call { verb, payload } => {
            let payload = cli::parse_payload(payload.as_deref())?;
            let response = client
                .execute(verb, payload)
                .await
                .with_context(|| format!("Call to {verb} failed"))?;

            println!("{}", output.format_response(verb, &response)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Batch { file } => {
            let entries = cli::read_batch_file(file)?;
            info!(file = %file.display(), exchanges = entries.len(), "Starting batch");

            let dispatcher = client.dispatcher();
            let mut batch = dispatcher.batch();
            for entry in entries {
                batch.submit(client.prepare(&entry.verb, Payload::from(entry.payload)));
            }

            batch.drive().await;
            let report = batch.collect();
            println!("{}", output.format_report(&report)?);

            if report.all_succeeded() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(&cli);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
