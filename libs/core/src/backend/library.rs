//! Library service backend (`library://`).

use std::path::Path;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use tracing::{debug, info};

use super::http::{check_status, download};
use super::{Backend, BackendError, BackendKind, FetchContext, Resolved};
use crate::cache::{CacheKey, Namespace};
use crate::config::PullerConfig;
use crate::digest::ContentId;
use crate::reference::{logical_name, split_scheme};

const DEFAULT_ENTITY: &str = "library";
const DEFAULT_COLLECTION: &str = "default";
const DEFAULT_TAG: &str = "latest";

/// `entity/collection/container:tag` of a library reference.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LibraryRef {
    entity: String,
    collection: String,
    container: String,
    tag: String,
}

impl LibraryRef {
    fn parse(reference: &str) -> Result<Self, BackendError> {
        let (_, rest) = split_scheme(reference);
        let rest = rest.trim_start_matches('/');

        let (path, tag) = match rest.rsplit_once(':') {
            Some((path, tag)) if !tag.contains('/') => (path, tag),
            _ => (rest, DEFAULT_TAG),
        };
        if tag.is_empty() {
            return Err(BackendError::invalid_reference(reference, "empty tag"));
        }

        let parts: Vec<&str> = path.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(BackendError::invalid_reference(reference, "empty path component"));
        }
        let (entity, collection, container) = match parts.as_slice() {
            [container] => (DEFAULT_ENTITY, DEFAULT_COLLECTION, *container),
            [entity, container] => (*entity, DEFAULT_COLLECTION, *container),
            [entity, collection, container] => (*entity, *collection, *container),
            _ => {
                return Err(BackendError::invalid_reference(
                    reference,
                    "expected [entity/[collection/]]container[:tag]",
                ))
            }
        };

        Ok(Self {
            entity: entity.to_string(),
            collection: collection.to_string(),
            container: container.to_string(),
            tag: tag.to_string(),
        })
    }

    fn path(&self) -> String {
        format!(
            "{}/{}/{}:{}",
            self.entity, self.collection, self.container, self.tag
        )
    }
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: ImageData,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    hash: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Resolves tags through the library metadata API and streams image files.
pub struct LibraryBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl LibraryBackend {
    pub fn new(client: Client, config: &PullerConfig) -> Self {
        Self {
            client,
            base_url: config.library_url.trim_end_matches('/').to_string(),
            token: config.library_token.clone(),
        }
    }

    fn url(&self, path: &str) -> Result<Url, BackendError> {
        let raw = format!("{}{}", self.base_url, path);
        Url::parse(&raw).map_err(|e| BackendError::invalid_reference(&raw, e.to_string()))
    }

    fn get(&self, url: Url) -> RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl Backend for LibraryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Library
    }

    async fn identify(&self, reference: &str) -> Result<Resolved, BackendError> {
        let image = LibraryRef::parse(reference)?;
        let url = self.url(&format!("/v1/images/{}", image.path()))?;

        debug!(url = %url, "Resolving library image");

        let response = check_status(self.get(url.clone()).send().await?)?;
        let body: ImageResponse = response.json().await?;

        let id = ContentId::new(body.data.hash)
            .map_err(|e| BackendError::invalid_response(&url, e.to_string()))?;
        let key = CacheKey::new(Namespace::Library, id, logical_name(reference))?;

        Ok(Resolved {
            key,
            location: Some(self.url(&format!("/v1/imagefile/{}", image.path()))?),
            size: body.data.size,
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

        info!(reference = %reference, id = %resolved.key.id(), "Downloading library image");

        let response = self.get(location).send().await?;
        let bytes = download(response, dest, ctx.progress).await?;

        debug!(reference = %reference, bytes, "Library image downloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("library://alpine", "library", "default", "alpine", "latest")]
    #[case("library://alpine:3.18", "library", "default", "alpine", "3.18")]
    #[case("library://sylabs/alpine:3.18", "sylabs", "default", "alpine", "3.18")]
    #[case("library://sylabs/tools/alpine", "sylabs", "tools", "alpine", "latest")]
    #[case("alpine:edge", "library", "default", "alpine", "edge")]
    fn test_parse_library_ref(
        #[case] reference: &str,
        #[case] entity: &str,
        #[case] collection: &str,
        #[case] container: &str,
        #[case] tag: &str,
    ) {
        let parsed = LibraryRef::parse(reference).unwrap();
        assert_eq!(parsed.entity, entity);
        assert_eq!(parsed.collection, collection);
        assert_eq!(parsed.container, container);
        assert_eq!(parsed.tag, tag);
    }

    #[rstest]
    #[case("library://")]
    #[case("library://a//b")]
    #[case("library://a/b/c/d")]
    #[case("library://alpine:")]
    fn test_parse_library_ref_rejects(#[case] reference: &str) {
        assert!(matches!(
            LibraryRef::parse(reference),
            Err(BackendError::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_library_ref_path() {
        let parsed = LibraryRef::parse("library://org/alpine:latest").unwrap();
        assert_eq!(parsed.path(), "org/default/alpine:latest");
    }
}
