//! Configuration for the puller and its backends.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;

pub const PROJECT_NAME: &str = "imgpull";

/// Default library service endpoint.
pub const DEFAULT_LIBRARY_URL: &str = "https://library.sylabs.io";

/// Default hub host.
pub const DEFAULT_HUB_HOST: &str = "singularity-hub.org";

/// Cache location and mode.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache root directory.
    pub root: PathBuf,
    /// Bypass the cache entirely.
    pub disabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
            disabled: false,
        }
    }
}

/// Default cache root: the platform cache directory, or the temp dir when
/// the platform has no home directory.
pub fn default_cache_root() -> PathBuf {
    ProjectDirs::from("", "", PROJECT_NAME)
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join(format!("{PROJECT_NAME}-cache")))
}

/// Registry username and password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Puller configuration.
#[derive(Debug, Clone)]
pub struct PullerConfig {
    pub cache: CacheConfig,
    /// Library service base URL.
    pub library_url: String,
    /// Bearer token for the library service.
    pub library_token: Option<String>,
    /// Hub host used when a hub reference names none.
    pub hub_host: String,
    /// Use plain http and skip TLS verification.
    pub no_https: bool,
    /// Registry credentials for OCI and artifact registries.
    pub credentials: Option<Credentials>,
    /// Scratch directory handed to the build pipeline.
    pub tmp_dir: Option<PathBuf>,
    /// Builder program for OCI/Docker sources.
    pub builder: Option<PathBuf>,
    /// Total timeout of a single HTTP request, body included.
    pub request_timeout: Duration,
}

impl Default for PullerConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            library_url: DEFAULT_LIBRARY_URL.to_string(),
            library_token: None,
            hub_host: DEFAULT_HUB_HOST.to_string(),
            no_https: false,
            credentials: None,
            tmp_dir: None,
            builder: None,
            request_timeout: Duration::from_secs(1800), // 30 minutes
        }
    }
}

impl PullerConfig {
    /// Defaults overlaid with `IMGPULL_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(root) = lookup("IMGPULL_CACHEDIR").filter(|s| !s.is_empty()) {
            config.cache.root = PathBuf::from(root);
        }
        if let Some(flag) = lookup("IMGPULL_DISABLE_CACHE") {
            config.cache.disabled = is_truthy(&flag);
        }
        if let Some(url) = lookup("IMGPULL_LIBRARY_URL").filter(|s| !s.is_empty()) {
            config.library_url = url;
        }
        config.library_token = lookup("IMGPULL_LIBRARY_TOKEN").filter(|s| !s.is_empty());
        if let Some(host) = lookup("IMGPULL_HUB_HOST").filter(|s| !s.is_empty()) {
            config.hub_host = host;
        }
        if let Some(flag) = lookup("IMGPULL_NO_HTTPS") {
            config.no_https = is_truthy(&flag);
        }
        if let (Some(username), Some(password)) = (
            lookup("IMGPULL_DOCKER_USERNAME"),
            lookup("IMGPULL_DOCKER_PASSWORD"),
        ) {
            config.credentials = Some(Credentials { username, password });
        }
        config.tmp_dir = lookup("IMGPULL_TMPDIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        config.builder = lookup("IMGPULL_BUILDER")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        if let Some(secs) = lookup("IMGPULL_TIMEOUT").and_then(|s| s.parse().ok()) {
            config.request_timeout = Duration::from_secs(secs);
        }

        config
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
