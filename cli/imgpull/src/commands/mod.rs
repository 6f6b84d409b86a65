//! CLI commands.

mod identify;
mod pull;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};
use imgpull_core::{Backends, ContentCache, Credentials, ImagePuller, PullerConfig};
use tracing::debug;

use crate::config::FileConfig;
use crate::output::OutputFormat;

/// imgpull - pull container images through a local cache.
#[derive(Debug, Parser)]
#[command(name = "imgpull")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Enable debug logging.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by all commands; each overrides the config file.
#[derive(Debug, Args)]
struct Settings {
    /// Cache root directory.
    #[arg(long, global = true, env = "IMGPULL_CACHEDIR")]
    cache_dir: Option<PathBuf>,

    /// Fetch straight to the destination without caching.
    #[arg(
        long,
        global = true,
        env = "IMGPULL_DISABLE_CACHE",
        value_parser = BoolishValueParser::new()
    )]
    disable_cache: bool,

    /// Library service base URL.
    #[arg(long, global = true, env = "IMGPULL_LIBRARY_URL")]
    library_url: Option<String>,

    /// Bearer token for the library service.
    #[arg(long, global = true, env = "IMGPULL_LIBRARY_TOKEN", hide_env_values = true)]
    library_token: Option<String>,

    /// Default hub host.
    #[arg(long, global = true, env = "IMGPULL_HUB_HOST")]
    hub_host: Option<String>,

    /// Use plain http and skip TLS verification.
    #[arg(
        long,
        global = true,
        env = "IMGPULL_NO_HTTPS",
        value_parser = BoolishValueParser::new()
    )]
    no_https: bool,

    /// Registry username.
    #[arg(
        long,
        global = true,
        env = "IMGPULL_DOCKER_USERNAME",
        requires = "docker_password"
    )]
    docker_username: Option<String>,

    /// Registry password.
    #[arg(
        long,
        global = true,
        env = "IMGPULL_DOCKER_PASSWORD",
        hide_env_values = true,
        requires = "docker_username"
    )]
    docker_password: Option<String>,

    /// Builder program for docker:// sources.
    #[arg(long, global = true, env = "IMGPULL_BUILDER")]
    builder: Option<PathBuf>,

    /// Scratch directory for the builder.
    #[arg(long, global = true, env = "IMGPULL_TMPDIR")]
    tmpdir: Option<PathBuf>,

    /// HTTP request timeout in seconds.
    #[arg(long, global = true, env = "IMGPULL_TIMEOUT")]
    timeout: Option<u64>,
}

impl Settings {
    /// Overlay onto `config`.
    fn apply(self, config: &mut PullerConfig) {
        if let Some(root) = self.cache_dir {
            config.cache.root = root;
        }
        config.cache.disabled |= self.disable_cache;
        if let Some(url) = self.library_url {
            config.library_url = url;
        }
        if self.library_token.is_some() {
            config.library_token = self.library_token;
        }
        if let Some(host) = self.hub_host {
            config.hub_host = host;
        }
        config.no_https |= self.no_https;
        if let (Some(username), Some(password)) = (self.docker_username, self.docker_password) {
            config.credentials = Some(Credentials { username, password });
        }
        if self.builder.is_some() {
            config.builder = self.builder;
        }
        if self.tmpdir.is_some() {
            config.tmp_dir = self.tmpdir;
        }
        if let Some(secs) = self.timeout {
            config.request_timeout = Duration::from_secs(secs);
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pull an image to a local file.
    Pull(pull::PullCommand),

    /// Resolve a reference without downloading it.
    Identify(identify::IdentifyCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn log_json(&self) -> bool {
        self.log_json
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let format = OutputFormat::parse(&self.format);

        let mut config = PullerConfig::default();
        FileConfig::load()?.apply(&mut config);
        self.settings.apply(&mut config);

        debug!(
            cache_root = %config.cache.root.display(),
            cache_disabled = config.cache.disabled,
            library_url = %config.library_url,
            "Configuration loaded"
        );

        let ctx = CommandContext { config, format };

        match self.command {
            Commands::Pull(cmd) => cmd.run(ctx).await,
            Commands::Identify(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("imgpull {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: PullerConfig,
    pub format: OutputFormat,
}

impl CommandContext {
    pub fn backends(&self) -> Result<Backends> {
        Ok(Backends::from_config(&self.config)?)
    }

    pub fn cache(&self) -> ContentCache {
        ContentCache::new(&self.config.cache)
    }

    pub fn puller(&self) -> ImagePuller {
        ImagePuller::new(self.cache())
    }
}
