//! Identify command.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::output::{print_field, print_json, OutputFormat};

use super::CommandContext;

/// Resolve a reference to its content identifier without downloading it.
#[derive(Debug, Args)]
pub struct IdentifyCommand {
    /// Image reference.
    reference: String,
}

#[derive(Debug, Serialize)]
struct IdentifyView {
    reference: String,
    backend: String,
    id: String,
    name: String,
    namespace: String,
    size: Option<u64>,
    /// Where the entry lives, or would live, in the cache.
    cache_path: Option<PathBuf>,
    cached: bool,
}

impl IdentifyCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let backends = ctx.backends()?;
        let backend = backends.for_reference(&self.reference)?;
        let resolved = backend.identify(&self.reference).await?;
        let key = &resolved.key;

        let cache = ctx.cache();
        let (cache_path, cached) = if cache.is_disabled() {
            (None, false)
        } else {
            // A corrupt entry counts as not cached; the next pull replaces it.
            (Some(cache.path(key)), cache.exists(key).unwrap_or(false))
        };

        let view = IdentifyView {
            reference: self.reference,
            backend: backend.kind().to_string(),
            id: key.id().to_string(),
            name: key.name().to_string(),
            namespace: key.namespace().to_string(),
            size: resolved.size,
            cache_path,
            cached,
        };

        match ctx.format {
            OutputFormat::Json => print_json(&view),
            OutputFormat::Table => {
                print_field("reference", &view.reference);
                print_field("backend", &view.backend);
                print_field("id", &view.id);
                print_field("name", &view.name);
                if let Some(size) = view.size {
                    print_field("size", &size.to_string());
                }
                match &view.cache_path {
                    Some(path) => {
                        print_field("cache path", &path.display().to_string());
                        print_field("cached", if view.cached { "yes" } else { "no" });
                    }
                    None => print_field("cache", "disabled"),
                }
            }
        }

        Ok(())
    }
}
