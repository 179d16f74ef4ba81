#![doc = include_str!("../README.md")]

mod cli;
mod logging;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use krb5_sidecar::client::MitKerberosClient;
use krb5_sidecar::kdc::KDC_TIMEOUT;
use krb5_sidecar::network_client::TokioNetworkClient;
use krb5_sidecar::options::{resolve, EnvSource, FileSource, Layered};
use krb5_sidecar::{KerberosOptions, OptionsCell, TicketLifecycleWorker, ValidationErrors};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::Krb5Sidecar;

#[derive(Debug, Clone)]
struct Settings {
    config: Option<PathBuf>,
    once: bool,
}

/// Environment first, then the TOML file given with `--config`.
fn load_options(settings: &Settings) -> Result<KerberosOptions, ValidationErrors> {
    let mut source = Layered::new().with(EnvSource);

    if let Some(path) = &settings.config {
        let file = FileSource::load(path).map_err(|err| ValidationErrors {
            errors: vec![format!("Cannot read {}: {}", path.display(), err)],
        })?;
        source = source.with(file);
    }

    let mut options = resolve(&source)?;
    if settings.once {
        options.run_once = true;
    }

    Ok(options)
}

#[cfg(unix)]
async fn handle_signals(settings: Settings, cell: OptionsCell, cancel: CancellationToken) -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = terminate.recv() => break,
            _ = interrupt.recv() => break,
            _ = hangup.recv() => match load_options(&settings) {
                Ok(options) => {
                    info!("Options reloaded");
                    cell.publish(options);
                }
                Err(errors) => warn!(%errors, "Ignoring invalid options"),
            },
        }
    }

    info!("Stopping");
    cancel.cancel();

    Ok(())
}

#[cfg(not(unix))]
async fn handle_signals(_settings: Settings, _cell: OptionsCell, cancel: CancellationToken) -> io::Result<()> {
    tokio::signal::ctrl_c().await?;

    info!("Stopping");
    cancel.cancel();

    Ok(())
}

async fn run(settings: Settings) -> ExitCode {
    let options = match load_options(&settings) {
        Ok(options) => options,
        Err(errors) => {
            for message in &errors.errors {
                eprintln!("{}", message);
            }

            return ExitCode::FAILURE;
        }
    };

    let network_client = match TokioNetworkClient::new(KDC_TIMEOUT) {
        Ok(client) => client,
        Err(err) => {
            error!(%err, "Cannot create the KDC network client");

            return ExitCode::FAILURE;
        }
    };

    let cell = OptionsCell::new(options);
    let worker = TicketLifecycleWorker::new(
        cell.clone(),
        Arc::new(MitKerberosClient::new()),
        Arc::new(network_client),
    );
    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(err) = handle_signals(settings, cell, cancel).await {
                error!(%err, "Cannot listen for signals");
            }
        }
    });

    worker.run(cancel).await;

    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    let flags = match Krb5Sidecar::from_env() {
        Ok(flags) => flags,
        Err(err) => err.exit(),
    };

    logging::init_logging();

    run(Settings {
        config: flags.config,
        once: flags.once,
    })
    .await
}
