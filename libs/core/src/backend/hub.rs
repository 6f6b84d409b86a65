//! Hub backend (`shub://`).

use std::path::Path;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, info};

use super::http::{check_status, download};
use super::{Backend, BackendError, BackendKind, FetchContext, Resolved};
use crate::cache::{CacheKey, Namespace};
use crate::config::PullerConfig;
use crate::digest::ContentId;
use crate::reference::{logical_name, registry_base_url, split_scheme};

/// `[host/]user/container[:tag]` of a hub reference.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HubRef {
    host: Option<String>,
    user: String,
    container: String,
    tag: String,
}

impl HubRef {
    fn parse(reference: &str) -> Result<Self, BackendError> {
        let (_, rest) = split_scheme(reference);
        let rest = rest.trim_start_matches('/');

        let parts: Vec<&str> = rest.split('/').collect();
        let (host, user, name) = match parts.as_slice() {
            [host, user, name] if host.contains(['.', ':']) => (Some(*host), *user, *name),
            [user, name] => (None, *user, *name),
            _ => {
                return Err(BackendError::invalid_reference(
                    reference,
                    "expected [host/]user/container[:tag]",
                ))
            }
        };

        let (container, tag) = name.split_once(':').unwrap_or((name, "latest"));
        if user.is_empty() || container.is_empty() || tag.is_empty() {
            return Err(BackendError::invalid_reference(reference, "empty path component"));
        }

        Ok(Self {
            host: host.map(str::to_string),
            user: user.to_string(),
            container: container.to_string(),
            tag: tag.to_string(),
        })
    }
}

/// Hub container manifest.
#[derive(Debug, Deserialize)]
struct HubManifest {
    image: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    version: Option<String>,
    commit: String,
}

/// Resolves hub manifests and streams the image they point at.
pub struct HubBackend {
    client: Client,
    default_host: String,
    no_https: bool,
}

impl HubBackend {
    pub fn new(client: Client, config: &PullerConfig) -> Self {
        Self {
            client,
            default_host: config.hub_host.clone(),
            no_https: config.no_https,
        }
    }

    fn manifest_url(&self, image: &HubRef) -> Result<Url, BackendError> {
        let host = image.host.as_deref().unwrap_or(&self.default_host);
        let raw = format!(
            "{}/api/container/{}/{}:{}",
            registry_base_url(host, self.no_https),
            image.user,
            image.container,
            image.tag
        );
        Url::parse(&raw).map_err(|e| BackendError::invalid_reference(&raw, e.to_string()))
    }
}

#[async_trait]
impl Backend for HubBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hub
    }

    async fn identify(&self, reference: &str) -> Result<Resolved, BackendError> {
        let image = HubRef::parse(reference)?;
        let url = self.manifest_url(&image)?;

        debug!(url = %url, "Resolving hub manifest");

        let response = check_status(self.client.get(url.clone()).send().await?)?;
        let manifest: HubManifest = response.json().await?;

        debug!(
            name = manifest.name.as_deref().unwrap_or_default(),
            tag = manifest.tag.as_deref().unwrap_or_default(),
            version = manifest.version.as_deref().unwrap_or_default(),
            commit = %manifest.commit,
            "Hub manifest"
        );

        let location = Url::parse(&manifest.image)
            .map_err(|e| BackendError::invalid_response(&url, format!("bad image url: {e}")))?;
        let id = ContentId::new(manifest.commit)
            .map_err(|e| BackendError::invalid_response(&url, e.to_string()))?;
        let key = CacheKey::new(Namespace::Shub, id, logical_name(reference))?;

        Ok(Resolved {
            key,
            location: Some(location),
            size: None,
        })
    }

    async fn fetch(
        &self,
        resolved: &Resolved,
        reference: &str,
        dest: &Path,
        ctx: &FetchContext<'_>,
    ) -> Result<(), BackendError> {
        let location = resolved.location.clone().ok_or_else(|| {
            BackendError::invalid_response(reference, "no download location resolved")
        })?;

        info!(reference = %reference, id = %resolved.key.id(), "Downloading hub image");

        let response = self.client.get(location).send().await?;
        let bytes = download(response, dest, ctx.progress).await?;

        debug!(reference = %reference, bytes, "Hub image downloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hub_ref() {
        let image = HubRef::parse("shub://vsoch/hello-world").unwrap();
        assert_eq!(image.host, None);
        assert_eq!(image.user, "vsoch");
        assert_eq!(image.container, "hello-world");
        assert_eq!(image.tag, "latest");

        let image = HubRef::parse("shub://hub.example.org/vsoch/hello-world:v2").unwrap();
        assert_eq!(image.host.as_deref(), Some("hub.example.org"));
        assert_eq!(image.tag, "v2");
    }

    #[test]
    fn test_parse_hub_ref_rejects() {
        assert!(HubRef::parse("shub://hello-world").is_err());
        assert!(HubRef::parse("shub://a/b/c").is_err());
        assert!(HubRef::parse("shub://vsoch/:v1").is_err());
    }

    #[test]
    fn test_manifest_url_uses_default_host() {
        let config = PullerConfig {
            hub_host: "hub.example.org".to_string(),
            ..PullerConfig::default()
        };
        let backend = HubBackend::new(Client::new(), &config);
        let image = HubRef::parse("shub://vsoch/hello-world").unwrap();

        assert_eq!(
            backend.manifest_url(&image).unwrap().as_str(),
            "https://hub.example.org/api/container/vsoch/hello-world:latest"
        );
    }
}
