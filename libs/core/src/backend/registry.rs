//! Minimal OCI distribution client: manifests and blob locations.
//!
//! Reference: https://github.com/opencontainers/distribution-spec

use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::http::check_status;
use super::BackendError;
use crate::config::Credentials;
use crate::digest::ContentId;
use crate::reference::{registry_base_url, ImageRef};

pub(crate) const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub(crate) const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub(crate) const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub(crate) const DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// OCI image manifest.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version.
    pub schema_version: u32,
    /// Media type.
    #[serde(default)]
    pub media_type: Option<String>,
    /// Config descriptor.
    pub config: Descriptor,
    /// Layer descriptors.
    pub layers: Vec<Descriptor>,
}

/// Content descriptor.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,
    /// Digest of the content.
    pub digest: String,
    /// Size in bytes.
    pub size: u64,
}

/// Raw manifest plus the digest that names it.
pub(crate) struct FetchedManifest {
    pub body: Vec<u8>,
    pub digest: ContentId,
}

/// Client for one registry host.
pub(crate) struct RegistryClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl RegistryClient {
    pub fn new(
        client: Client,
        image: &ImageRef,
        no_https: bool,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            client,
            base_url: registry_base_url(&image.registry, no_https),
            credentials,
        }
    }

    /// GET `url`, answering one bearer-token challenge if the registry
    /// sends it.
    ///
    /// Basic credentials, when configured, are sent up front and again to
    /// the token realm.
    pub async fn send(&self, url: Url, accept: Option<&str>) -> Result<Response, BackendError> {
        let response = self.request(url.clone(), accept, None).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(BearerChallenge::parse);
        let Some(challenge) = challenge else {
            return Ok(response);
        };

        let token = self.fetch_token(&challenge).await?;
        Ok(self.request(url, accept, Some(&token)).send().await?)
    }

    fn request(&self, url: Url, accept: Option<&str>, token: Option<&str>) -> RequestBuilder {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        match (token, &self.credentials) {
            (Some(token), _) => request.bearer_auth(token),
            (None, Some(creds)) => request.basic_auth(&creds.username, Some(&creds.password)),
            (None, None) => request,
        }
    }

    async fn fetch_token(&self, challenge: &BearerChallenge) -> Result<String, BackendError> {
        let mut url = Url::parse(&challenge.realm)
            .map_err(|e| BackendError::invalid_response(&challenge.realm, e.to_string()))?;
        if challenge.service.is_some() || challenge.scope.is_some() {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            if let Some(scope) = &challenge.scope {
                query.append_pair("scope", scope);
            }
        }

        debug!(realm = %challenge.realm, "Requesting registry token");

        let mut request = self.client.get(url.clone());
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }
        let response: TokenResponse = check_status(request.send().await?)?.json().await?;
        response
            .token
            .or(response.access_token)
            .ok_or_else(|| BackendError::invalid_response(url, "token response carries no token"))
    }

    /// Pull a manifest by tag or digest.
    ///
    /// The digest comes from `Docker-Content-Digest` when the registry sends
    /// it and from the sha256 of the body otherwise. Digest references are
    /// checked against the body.
    pub async fn get_manifest(
        &self,
        image: &ImageRef,
        accept: &str,
    ) -> Result<FetchedManifest, BackendError> {
        let url = self.url(&format!(
            "/v2/{}/manifests/{}",
            image.repository, image.reference
        ))?;

        debug!(url = %url, "Pulling manifest");

        let response = check_status(self.send(url, Some(accept)).await?)?;
        let header_digest = response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| ContentId::new(v).ok());
        let body = response.bytes().await?.to_vec();

        if image.is_digest() {
            check_reference_digest(&image.reference, &body)?;
        }

        let digest = header_digest.unwrap_or_else(|| ContentId::sha256_of(&body));
        Ok(FetchedManifest { body, digest })
    }

    /// Location of a blob.
    pub fn blob_url(&self, repository: &str, digest: &str) -> Result<Url, BackendError> {
        self.url(&format!("/v2/{repository}/blobs/{digest}"))
    }

    fn url(&self, path: &str) -> Result<Url, BackendError> {
        let raw = format!("{}{}", self.base_url, path);
        Url::parse(&raw).map_err(|e| BackendError::invalid_reference(&raw, e.to_string()))
    }
}

/// Check a manifest body against the digest it was requested by.
fn check_reference_digest(digest: &str, body: &[u8]) -> Result<(), BackendError> {
    let expected = ContentId::new(digest)
        .ok()
        .filter(|id| id.as_str().starts_with("sha256:") && id.sha256_hex().is_some())
        .ok_or_else(|| BackendError::UnsupportedDigest(digest.to_string()))?;

    let actual = hex::encode(Sha256::digest(body));
    if expected.matches_sha256(&actual) {
        Ok(())
    } else {
        Err(BackendError::DigestMismatch {
            expected: digest.to_string(),
            actual: format!("sha256:{actual}"),
        })
    }
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Parameters of a `WWW-Authenticate: Bearer ...` header.
#[derive(Debug, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

impl BearerChallenge {
    fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for param in split_params(params) {
            let Some((name, value)) = param.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            match name.trim() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            service,
            scope,
        })
    }
}

/// Split on commas outside double quotes.
fn split_params(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in params.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&params[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&params[start..]);
    parts
}

impl Manifest {
    /// First layer with `media_type`, or the only layer when none matches.
    pub fn image_layer(&self, media_type: &str) -> Option<&Descriptor> {
        self.layers
            .iter()
            .find(|l| l.media_type == media_type)
            .or_else(|| match self.layers.as_slice() {
                [only] => Some(only),
                _ => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(media_type: &str, digest: &str, size: u64) -> Descriptor {
        Descriptor {
            media_type: media_type.to_string(),
            digest: digest.to_string(),
            size,
        }
    }

    fn manifest(layers: Vec<Descriptor>) -> Manifest {
        Manifest {
            schema_version: 2,
            media_type: None,
            config: descriptor(
                "application/vnd.oci.image.config.v1+json",
                "sha256:config",
                1000,
            ),
            layers,
        }
    }

    #[test]
    fn test_reference_digest_check() {
        let body = b"{\"schemaVersion\":2}";
        let hex = hex::encode(Sha256::digest(body));

        check_reference_digest(&format!("sha256:{hex}"), body).unwrap();
        check_reference_digest(&format!("sha256:{}", hex.to_uppercase()), body).unwrap();

        let other = "0".repeat(64);
        assert!(matches!(
            check_reference_digest(&format!("sha256:{other}"), body),
            Err(BackendError::DigestMismatch { .. })
        ));
        assert!(matches!(
            check_reference_digest(&format!("sha512:{}", "a".repeat(128)), body),
            Err(BackendError::UnsupportedDigest(_))
        ));
    }

    #[test]
    fn test_image_layer_selection() {
        let sif = "application/vnd.sylabs.sif.layer.v1.sif";
        let by_type = manifest(vec![
            descriptor("text/plain", "sha256:readme", 10),
            descriptor(sif, "sha256:image", 100),
        ]);
        assert_eq!(by_type.image_layer(sif).unwrap().digest, "sha256:image");

        let single = manifest(vec![descriptor("application/octet-stream", "sha256:only", 5)]);
        assert_eq!(single.image_layer(sif).unwrap().digest, "sha256:only");

        let ambiguous = manifest(vec![
            descriptor("text/plain", "sha256:a", 1),
            descriptor("text/plain", "sha256:b", 1),
        ]);
        assert!(ambiguous.image_layer(sif).is_none());
    }

    #[test]
    fn test_bearer_challenge_parse() {
        let challenge = BearerChallenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull,push""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(
            challenge.scope.as_deref(),
            Some("repository:library/alpine:pull,push")
        );

        assert!(BearerChallenge::parse(r#"Basic realm="registry""#).is_none());
        assert!(BearerChallenge::parse(r#"Bearer service="x""#).is_none());
    }

    #[test]
    fn test_manifest_parses_registry_json() {
        let json = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {"mediaType": "application/vnd.sylabs.sif.config.v1+json", "digest": "sha256:c", "size": 2},
            "layers": [{"mediaType": "application/vnd.sylabs.sif.layer.v1.sif", "digest": "sha256:l", "size": 42, "annotations": {"org.opencontainers.image.title": "x.sif"}}]
        }"#;
        let manifest: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.layers.len(), 1);
        assert_eq!(manifest.layers[0].size, 42);
    }
}
