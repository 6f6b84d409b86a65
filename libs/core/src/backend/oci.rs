//! OCI/Docker backend (`docker://`).
//!
//! Identity is the manifest digest. The image file itself is produced by the
//! build pipeline, which converts the registry image into a SIF.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

use super::registry::{
    RegistryClient, DOCKER_MANIFEST, DOCKER_MANIFEST_LIST, OCI_INDEX, OCI_MANIFEST,
};
use super::{Backend, BackendError, BackendKind, FetchContext, Resolved};
use crate::build::{BuildOptions, BuildPipeline, BuildRequest, SIF_FORMAT};
use crate::cache::{CacheKey, Namespace};
use crate::config::{Credentials, PullerConfig};
use crate::reference::{logical_name, parse_image_ref};

pub struct OciBackend {
    client: Client,
    no_https: bool,
    credentials: Option<Credentials>,
    tmp_dir: Option<PathBuf>,
    pipeline: Arc<dyn BuildPipeline>,
}

impl OciBackend {
    pub fn new(client: Client, config: &PullerConfig, pipeline: Arc<dyn BuildPipeline>) -> Self {
        Self {
            client,
            no_https: config.no_https,
            credentials: config.credentials.clone(),
            tmp_dir: config.tmp_dir.clone(),
            pipeline,
        }
    }
}

#[async_trait]
impl Backend for OciBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Oci
    }

    async fn identify(&self, reference: &str) -> Result<Resolved, BackendError> {
        let image = parse_image_ref(reference)?;
        let registry = RegistryClient::new(
            self.client.clone(),
            &image,
            self.no_https,
            self.credentials.clone(),
        );

        let accept = [OCI_MANIFEST, OCI_INDEX, DOCKER_MANIFEST, DOCKER_MANIFEST_LIST].join(", ");
        let fetched = registry.get_manifest(&image, &accept).await?;

        let key = CacheKey::new(Namespace::OciTmp, fetched.digest, logical_name(reference))?;
        Ok(Resolved {
            key,
            location: None,
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
        info!(reference = %reference, id = %resolved.key.id(), "Building image from registry");

        let request = BuildRequest {
            reference: reference.to_string(),
            destination: dest.to_path_buf(),
            format: SIF_FORMAT.to_string(),
            options: BuildOptions {
                tmp_dir: self.tmp_dir.clone(),
                no_https: self.no_https,
                credentials: self.credentials.clone(),
                no_cache: ctx.cache_disabled,
            },
        };
        self.pipeline.build(&request).await?;
        Ok(())
    }
}
