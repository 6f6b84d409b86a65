//! Reference parsing shared by the backends.

use crate::backend::BackendError;

/// Registry used for references that name none.
pub const DOCKER_HUB_REGISTRY: &str = "registry-1.docker.io";

/// Split `scheme://rest` into its parts. References without a scheme
/// return `None` and the input unchanged.
pub fn split_scheme(reference: &str) -> (Option<&str>, &str) {
    match reference.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, reference),
    }
}

/// File name an image is cached under, derived from its reference.
///
/// `library://org/alpine:3.18` → `alpine_3.18.sif`, `docker://alpine` →
/// `alpine_latest.sif`, `oras://host/repo@sha256:ab..` → `repo_ab...sif`.
pub fn logical_name(reference: &str) -> String {
    let (_, rest) = split_scheme(reference);
    let last = rest.trim_end_matches('/').rsplit('/').next().unwrap_or(rest);

    let (container, tag) = if let Some((name, digest)) = last.split_once('@') {
        let encoded = digest.split_once(':').map(|(_, e)| e).unwrap_or(digest);
        (name, encoded)
    } else if let Some((name, tag)) = last.split_once(':') {
        (name, tag)
    } else {
        (last, "latest")
    };

    let container = if container.is_empty() { "image" } else { container };
    let tag = if tag.is_empty() { "latest" } else { tag };
    format!("{container}_{tag}.sif")
}

/// Registry, repository and tag-or-digest of an OCI reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: String,
    pub repository: String,
    pub reference: String,
}

impl ImageRef {
    /// Whether `reference` is a digest rather than a tag.
    pub fn is_digest(&self) -> bool {
        self.reference.contains(':')
    }
}

/// Parse an OCI image reference into registry, repository and tag/digest.
///
/// The scheme, if any, is ignored. Examples:
/// - `alpine:latest` -> (registry-1.docker.io, library/alpine, latest)
/// - `ghcr.io/org/repo:v1` -> (ghcr.io, org/repo, v1)
/// - `registry.example.com/foo/bar@sha256:abc...` -> (registry.example.com, foo/bar, sha256:abc...)
pub fn parse_image_ref(image_ref: &str) -> Result<ImageRef, BackendError> {
    let (_, image_ref) = split_scheme(image_ref);
    let image_ref = image_ref.trim_start_matches('/');
    if image_ref.is_empty() {
        return Err(BackendError::invalid_reference(image_ref, "empty image reference"));
    }

    // Handle digest reference
    let (name_part, reference) = if let Some((name, digest)) = image_ref.rsplit_once('@') {
        (name, digest.to_string())
    } else if let Some((name, tag)) = image_ref.rsplit_once(':') {
        // Make sure this isn't a port number
        if tag.contains('/') || name.ends_with(']') {
            (image_ref, "latest".to_string())
        } else {
            (name, tag.to_string())
        }
    } else {
        (image_ref, "latest".to_string())
    };

    if name_part.is_empty() || reference.is_empty() {
        return Err(BackendError::invalid_reference(
            image_ref,
            "missing repository or tag",
        ));
    }

    // Parse registry and repo
    let parts: Vec<&str> = name_part.splitn(2, '/').collect();
    let (registry, repository) = if parts.len() == 1 {
        // No slash - Docker Hub library image
        (DOCKER_HUB_REGISTRY.to_string(), format!("library/{}", parts[0]))
    } else if parts[0].contains('.') || parts[0].contains(':') || parts[0] == "localhost" {
        // First part looks like a registry
        (parts[0].to_string(), parts[1].to_string())
    } else {
        // Docker Hub user image
        (DOCKER_HUB_REGISTRY.to_string(), name_part.to_string())
    };

    if repository.is_empty() || repository.split('/').any(str::is_empty) {
        return Err(BackendError::invalid_reference(image_ref, "empty repository path"));
    }

    Ok(ImageRef {
        registry,
        repository,
        reference,
    })
}

/// Base URL for a registry host.
///
/// Plain http is used for `localhost` registries and when TLS is disabled.
pub fn registry_base_url(registry: &str, no_https: bool) -> String {
    if registry.starts_with("http://") || registry.starts_with("https://") {
        return registry.trim_end_matches('/').to_string();
    }
    let host = registry.split(':').next().unwrap_or(registry);
    if no_https || host == "localhost" || host == "127.0.0.1" {
        format!("http://{registry}")
    } else {
        format!("https://{registry}")
    }
}
