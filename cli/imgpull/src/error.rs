//! Error display for the CLI.

use colored::Colorize;
use imgpull_core::{BackendError, BuildError, PullError};

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(hint) = hint_for(err) {
        eprintln!("\n{}", format!("Hint: {hint}").yellow());
    }
}

/// Hint for the errors a user can act on.
fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    if let Some(pull_err) = err.downcast_ref::<PullError>() {
        return match pull_err {
            PullError::DestinationExists { .. } => Some("Pass --force to overwrite it."),
            PullError::Resolution { source, .. } | PullError::Fetch { source, .. } => {
                backend_hint(source)
            }
            PullError::Integrity { .. } => Some(
                "The download was discarded and nothing was cached. Retry the pull; \
                 if it keeps failing the remote is serving different content than it advertises.",
            ),
            PullError::Copy { .. } => Some(
                "The cached image is intact. Fix the destination and retry; \
                 nothing will be downloaded again.",
            ),
            PullError::Interrupted { .. } => None,
            PullError::Cache { .. } => {
                Some("Check permissions on the cache directory, or pass --disable-cache.")
            }
        };
    }

    err.downcast_ref::<BackendError>().and_then(backend_hint)
}

fn backend_hint(err: &BackendError) -> Option<&'static str> {
    match err {
        BackendError::UnsupportedTransport(_) => {
            Some("Supported schemes are library://, shub://, docker:// and oras://.")
        }
        BackendError::AuthRequired(_) => Some(
            "Provide credentials with --docker-username/--docker-password \
             or --library-token.",
        ),
        BackendError::Http(_) => Some("Check your network connection and the remote endpoint."),
        BackendError::Build(BuildError::NotConfigured) => {
            Some("docker:// sources need a builder program; pass --builder or set IMGPULL_BUILDER.")
        }
        _ => None,
    }
}
