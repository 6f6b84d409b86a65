//! Pull command.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use imgpull_core::{logical_name, PullRequest};

use crate::output::{print_info, print_json, print_success, OutputFormat};

use super::CommandContext;

/// Pull an image to a local file.
///
/// With a single argument the destination is derived from the reference,
/// e.g. `library://alpine:3.18` is written to `alpine_3.18.sif`.
#[derive(Debug, Args)]
pub struct PullCommand {
    /// Optional destination file followed by the image reference.
    #[arg(value_name = "[DEST] REF", num_args = 1..=2, required = true)]
    targets: Vec<String>,

    /// Overwrite an existing destination file.
    #[arg(long, short = 'F')]
    force: bool,
}

impl PullCommand {
    /// Split positional arguments into destination and reference.
    fn destination_and_reference(&self) -> Result<(PathBuf, String)> {
        match self.targets.as_slice() {
            [reference] => Ok((PathBuf::from(logical_name(reference)), reference.clone())),
            [dest, reference] => Ok((PathBuf::from(dest), reference.clone())),
            _ => bail!("expected [DEST] REF"),
        }
    }

    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let (destination, reference) = self.destination_and_reference()?;

        let backends = ctx.backends()?;
        let backend = backends.for_reference(&reference)?;
        let request = PullRequest::new(reference, destination).with_force(self.force);

        let result = ctx.puller().pull(backend.as_ref(), &request).await?;

        match ctx.format {
            OutputFormat::Json => print_json(&result),
            OutputFormat::Table => {
                print_success(&format!(
                    "Pulled {} to {}",
                    result.reference,
                    result.destination.display()
                ));
                let source = if result.cache_path.is_none() {
                    "cache disabled"
                } else if result.was_cached {
                    "cache hit"
                } else {
                    "downloaded"
                };
                print_info(&format!("{} ({})", result.id, source));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn command(targets: &[&str]) -> PullCommand {
        PullCommand {
            targets: targets.iter().map(|s| s.to_string()).collect(),
            force: false,
        }
    }

    #[rstest]
    #[case(&["library://alpine:3.18"], "alpine_3.18.sif", "library://alpine:3.18")]
    #[case(&["./out.sif", "docker://ubuntu"], "./out.sif", "docker://ubuntu")]
    #[case(&["oras://ghcr.io/org/app@sha256:abc"], "app_abc.sif", "oras://ghcr.io/org/app@sha256:abc")]
    fn test_destination_and_reference(
        #[case] targets: &[&str],
        #[case] dest: &str,
        #[case] reference: &str,
    ) {
        let (d, r) = command(targets).destination_and_reference().unwrap();
        assert_eq!(d, PathBuf::from(dest));
        assert_eq!(r, reference);
    }

    #[test]
    fn test_parse_force_flag() {
        use crate::commands::{Cli, Commands};
        use clap::Parser;

        let cli = Cli::try_parse_from([
            "imgpull",
            "pull",
            "-F",
            "alpine.sif",
            "library://alpine",
        ])
        .unwrap();
        match cli.command {
            Commands::Pull(cmd) => {
                assert!(cmd.force);
                assert_eq!(cmd.targets, vec!["alpine.sif", "library://alpine"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
