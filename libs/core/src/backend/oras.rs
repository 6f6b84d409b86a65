//! Artifact registry backend (`oras://`).
//!
//! The image is stored as a single SIF layer of an OCI artifact manifest.
//! The layer digest names the content, so entries are content-addressed.

use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use super::http::download;
use super::registry::{Manifest, RegistryClient, OCI_MANIFEST};
use super::{Backend, BackendError, BackendKind, FetchContext, Resolved};
use crate::cache::{CacheKey, Namespace};
use crate::config::{Credentials, PullerConfig};
use crate::digest::ContentId;
use crate::reference::{logical_name, parse_image_ref, split_scheme, ImageRef};

/// Media type of the SIF image layer.
pub const SIF_LAYER_MEDIA_TYPE: &str = "application/vnd.sylabs.sif.layer.v1.sif";

pub struct OrasBackend {
    client: Client,
    no_https: bool,
    credentials: Option<Credentials>,
}

impl OrasBackend {
    pub fn new(client: Client, config: &PullerConfig) -> Self {
        Self {
            client,
            no_https: config.no_https,
            credentials: config.credentials.clone(),
        }
    }

    fn registry(&self, image: &ImageRef) -> RegistryClient {
        RegistryClient::new(
            self.client.clone(),
            image,
            self.no_https,
            self.credentials.clone(),
        )
    }
}

#[async_trait]
impl Backend for OrasBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Oras
    }

    async fn identify(&self, reference: &str) -> Result<Resolved, BackendError> {
        let image = parse_image_ref(reference)?;
        let registry = self.registry(&image);

        let fetched = registry.get_manifest(&image, OCI_MANIFEST).await?;
        let manifest: Manifest = serde_json::from_slice(&fetched.body)?;

        let layer = manifest.image_layer(SIF_LAYER_MEDIA_TYPE).ok_or_else(|| {
            BackendError::invalid_response(
                reference,
                format!("no {SIF_LAYER_MEDIA_TYPE} layer in manifest {}", fetched.digest),
            )
        })?;
        debug!(
            manifest = %fetched.digest,
            layer = %layer.digest,
            size = layer.size,
            "Resolved artifact layer"
        );

        let id = ContentId::new(layer.digest.clone())
            .map_err(|e| BackendError::invalid_response(reference, e.to_string()))?;
        let name = logical_name(&format!("oras://{}", split_scheme(reference).1));
        let key = CacheKey::new(Namespace::Oras, id, name)?;

        Ok(Resolved {
            location: Some(registry.blob_url(&image.repository, key.id().as_str())?),
            size: Some(layer.size),
            key,
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
        let image = parse_image_ref(reference)?;

        info!(reference = %reference, id = %resolved.key.id(), "Downloading artifact layer");

        let response = self.registry(&image).send(location, None).await?;
        let bytes = download(response, dest, ctx.progress).await?;

        debug!(reference = %reference, bytes, "Artifact layer downloaded");
        Ok(())
    }
}
