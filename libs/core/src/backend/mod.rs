//! Remote image backends.
//!
//! Each backend pairs a resolver (`identify`) with a fetcher (`fetch`):
//!
//! | Backend | Scheme | Identifier |
//! |---|---|---|
//! | [`LibraryBackend`] | `library://` | server-supplied sha256 of the tag |
//! | [`HubBackend`] | `shub://` | manifest commit |
//! | [`OciBackend`] | `docker://` | manifest digest; fetch runs the build pipeline |
//! | [`OrasBackend`] | `oras://` | digest of the image layer |
//!
//! The puller is written against [`Backend`] only.

mod hub;
mod library;
mod oci;
mod oras;
pub(crate) mod http;
pub(crate) mod registry;

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;

use crate::build::{BuildError, BuildPipeline, CommandPipeline, UnconfiguredPipeline};
use crate::cache::{CacheError, CacheKey};
use crate::config::PullerConfig;
use crate::progress::Progress;
use crate::reference::split_scheme;

pub use hub::HubBackend;
pub use library::LibraryBackend;
pub use oci::OciBackend;
pub use oras::{OrasBackend, SIF_LAYER_MEDIA_TYPE};
pub use registry::{Descriptor, Manifest};

/// Errors from resolving or fetching remote content.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("unsupported transport {0:?}")]
    UnsupportedTransport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication required for {0}")]
    AuthRequired(String),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("unsupported digest {0:?}: only sha256 is supported")]
    UnsupportedDigest(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl BackendError {
    pub(crate) fn invalid_reference(reference: &str, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_response(url: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// The four supported remote protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Library,
    Hub,
    Oci,
    Oras,
}

impl BackendKind {
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Library => "library",
            Self::Hub => "shub",
            Self::Oci => "docker",
            Self::Oras => "oras",
        }
    }

    /// Backend selected by the reference scheme; no scheme means library.
    pub fn from_reference(reference: &str) -> Result<Self, BackendError> {
        match split_scheme(reference).0 {
            None | Some("library") => Ok(Self::Library),
            Some("shub") => Ok(Self::Hub),
            Some("docker") => Ok(Self::Oci),
            Some("oras") => Ok(Self::Oras),
            Some(other) => Err(BackendError::UnsupportedTransport(other.to_string())),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Outcome of `identify`: what the content is and where to get it.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Cache key; carries the identifier and logical name.
    pub key: CacheKey,
    /// Download location of the payload, for streaming backends.
    pub location: Option<Url>,
    /// Payload size when the remote reports it.
    pub size: Option<u64>,
}

/// Per-fetch inputs supplied by the puller.
pub struct FetchContext<'a> {
    pub progress: &'a dyn Progress,
    /// Set when the cache is disabled; forwarded to the build pipeline.
    pub cache_disabled: bool,
}

/// A remote image protocol.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Name the content behind `reference` without downloading it.
    async fn identify(&self, reference: &str) -> Result<Resolved, BackendError>;

    /// Write the full content to `dest`.
    async fn fetch(
        &self,
        resolved: &Resolved,
        reference: &str,
        dest: &Path,
        ctx: &FetchContext<'_>,
    ) -> Result<(), BackendError>;
}

/// One configured backend per protocol.
#[derive(Clone)]
pub struct Backends {
    library: Arc<dyn Backend>,
    hub: Arc<dyn Backend>,
    oci: Arc<dyn Backend>,
    oras: Arc<dyn Backend>,
}

impl Backends {
    pub fn new(
        library: Arc<dyn Backend>,
        hub: Arc<dyn Backend>,
        oci: Arc<dyn Backend>,
        oras: Arc<dyn Backend>,
    ) -> Self {
        Self {
            library,
            hub,
            oci,
            oras,
        }
    }

    /// Build the HTTP backends and the build pipeline from configuration.
    pub fn from_config(config: &PullerConfig) -> Result<Self, BackendError> {
        let pipeline: Arc<dyn BuildPipeline> = match &config.builder {
            Some(program) => Arc::new(CommandPipeline::new(program.clone())),
            None => Arc::new(UnconfiguredPipeline),
        };
        Self::with_pipeline(config, pipeline)
    }

    /// Like [`Backends::from_config`] with an explicit build pipeline.
    pub fn with_pipeline(
        config: &PullerConfig,
        pipeline: Arc<dyn BuildPipeline>,
    ) -> Result<Self, BackendError> {
        let client = http::client(config)?;

        Ok(Self::new(
            Arc::new(LibraryBackend::new(client.clone(), config)),
            Arc::new(HubBackend::new(client.clone(), config)),
            Arc::new(OciBackend::new(client.clone(), config, pipeline)),
            Arc::new(OrasBackend::new(client, config)),
        ))
    }

    pub fn get(&self, kind: BackendKind) -> Arc<dyn Backend> {
        match kind {
            BackendKind::Library => self.library.clone(),
            BackendKind::Hub => self.hub.clone(),
            BackendKind::Oci => self.oci.clone(),
            BackendKind::Oras => self.oras.clone(),
        }
    }

    pub fn for_reference(&self, reference: &str) -> Result<Arc<dyn Backend>, BackendError> {
        Ok(self.get(BackendKind::from_reference(reference)?))
    }
}
