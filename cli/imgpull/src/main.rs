//! imgpull - pull container images through a local content-addressable cache.
//!
//! Supported sources: `library://`, `shub://`, `docker://` and `oras://`.

use std::future::Future;

use anyhow::Result;
use clap::Parser;
use imgpull_core::{interrupt_signal, PullError, INTERRUPT_EXIT_CODE};
use tracing::warn;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose(), cli.log_json());

    let interrupted = interrupt_signal()?;
    match until_interrupted(cli.run(), interrupted).await {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) if is_interrupt(&e) => {
            warn!(error = %e, "Interrupted");
            std::process::exit(INTERRUPT_EXIT_CODE);
        }
        Some(Err(e)) => {
            error::print_error(&e);
            std::process::exit(1);
        }
        None => {
            warn!("Interrupted");
            std::process::exit(INTERRUPT_EXIT_CODE);
        }
    }
}

/// Run `work` until it finishes or `interrupted` fires.
///
/// On interrupt `work` is dropped before this returns, so partial files and
/// builder children owned by it are cleaned up before the process exits.
async fn until_interrupted<T>(
    work: impl Future<Output = T>,
    interrupted: impl Future<Output = ()>,
) -> Option<T> {
    tokio::select! {
        result = work => Some(result),
        _ = interrupted => None,
    }
}

fn is_interrupt(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<PullError>(),
        Some(PullError::Interrupted { .. })
    )
}

/// Logs go to stderr so `--format json` output stays clean.
fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
