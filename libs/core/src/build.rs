//! Build pipeline used by the OCI/Docker backend.
//!
//! Converting a registry image into a single image file is delegated to an
//! external builder program. The pipeline either leaves a complete file at
//! the requested destination or fails; a partial output is never reported as
//! success.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::Credentials;

/// Output format requested from the builder.
pub const SIF_FORMAT: &str = "sif";

/// Environment variables carrying registry credentials to the builder.
pub const USERNAME_ENV: &str = "IMGPULL_REGISTRY_USERNAME";
pub const PASSWORD_ENV: &str = "IMGPULL_REGISTRY_PASSWORD";

/// Keep at most this much of the builder's stderr in errors.
const STDERR_TAIL: usize = 4096;

/// Errors from the build pipeline.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no builder configured; set IMGPULL_BUILDER or pass --builder")]
    NotConfigured,

    #[error("failed to start builder {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("builder {} exited with {}: {stderr}", .program.display(), exit_label(.code))]
    Failed {
        program: PathBuf,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Options forwarded to the builder.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub tmp_dir: Option<PathBuf>,
    /// Plain http and no TLS verification against the source registry.
    pub no_https: bool,
    pub credentials: Option<Credentials>,
    /// Set when the image cache is disabled.
    pub no_cache: bool,
}

/// One build: `reference` in, image file at `destination` out.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub reference: String,
    pub destination: PathBuf,
    pub format: String,
    pub options: BuildOptions,
}

/// Produces an image file from a registry reference.
#[async_trait]
pub trait BuildPipeline: Send + Sync {
    async fn build(&self, request: &BuildRequest) -> Result<(), BuildError>;
}

/// Runs a builder program as a child process.
///
/// Invoked as
/// `<program> build --force --format <fmt> [--tmpdir DIR] [--no-https] [--disable-cache] <dest> <ref>`
/// with credentials passed through the environment, never on the command
/// line.
#[derive(Debug, Clone)]
pub struct CommandPipeline {
    program: PathBuf,
}

impl CommandPipeline {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, request: &BuildRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("build")
            .arg("--force")
            .args(["--format", request.format.as_str()]);

        let options = &request.options;
        if let Some(tmp_dir) = &options.tmp_dir {
            cmd.arg("--tmpdir").arg(tmp_dir);
        }
        if options.no_https {
            cmd.arg("--no-https");
        }
        if options.no_cache {
            cmd.arg("--disable-cache");
        }
        if let Some(creds) = &options.credentials {
            cmd.env(USERNAME_ENV, &creds.username)
                .env(PASSWORD_ENV, &creds.password);
        }

        cmd.arg(&request.destination)
            .arg(&request.reference)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl BuildPipeline for CommandPipeline {
    async fn build(&self, request: &BuildRequest) -> Result<(), BuildError> {
        info!(
            program = %self.program.display(),
            reference = %request.reference,
            destination = %request.destination.display(),
            "Running image builder"
        );

        let output = self
            .command(request)
            .output()
            .await
            .map_err(|source| BuildError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let start = stderr.len().saturating_sub(STDERR_TAIL);
            let start = (start..stderr.len())
                .find(|&i| stderr.is_char_boundary(i))
                .unwrap_or(stderr.len());
            return Err(BuildError::Failed {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: stderr[start..].trim().to_string(),
            });
        }

        debug!(destination = %request.destination.display(), "Builder finished");
        Ok(())
    }
}

/// Pipeline used when no builder program is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredPipeline;

#[async_trait]
impl BuildPipeline for UnconfiguredPipeline {
    async fn build(&self, _request: &BuildRequest) -> Result<(), BuildError> {
        Err(BuildError::NotConfigured)
    }
}
