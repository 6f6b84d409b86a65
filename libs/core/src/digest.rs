//! Content identifiers and sha256 helpers.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Maximum length of an identifier; it is used as a single path component.
const MAX_ID_LEN: usize = 255;

/// Rejected content identifier.
#[derive(Debug, Error)]
#[error("invalid content identifier: {0:?}")]
pub struct InvalidContentId(pub String);

/// Backend-scoped checksum naming resolved content.
///
/// The string is kept exactly as the remote returned it: `sha256:<hex>` from
/// registries, `sha256.<hex>` from the library service, a bare commit hash
/// from the hub. It becomes a directory name under the cache root, so only
/// `[A-Za-z0-9._:+=-]` is accepted and it must start with an alphanumeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidContentId> {
        let id = id.into();
        let valid_head = id
            .chars()
            .next()
            .map(|c| c.is_ascii_alphanumeric())
            .unwrap_or(false);
        let valid_body = id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '+' | '=' | '-'));

        if valid_head && valid_body && id.len() <= MAX_ID_LEN {
            Ok(Self(id))
        } else {
            Err(InvalidContentId(id))
        }
    }

    /// Identifier for the sha256 of `bytes`, in registry form.
    pub fn sha256_of(bytes: &[u8]) -> Self {
        Self(format!("sha256:{}", hex::encode(Sha256::digest(bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex part of the identifier when it names a sha256 checksum.
    ///
    /// Both `sha256:<hex>` and `sha256.<hex>` qualify.
    pub fn sha256_hex(&self) -> Option<&str> {
        let (algorithm, encoded) = self.0.split_once([':', '.'])?;
        let is_hex = encoded.len() == 64 && encoded.bytes().all(|b| b.is_ascii_hexdigit());
        (algorithm == "sha256" && is_hex).then_some(encoded)
    }

    /// Whether `actual_hex` is the sha256 this identifier names.
    pub fn matches_sha256(&self, actual_hex: &str) -> bool {
        self.sha256_hex()
            .map(|expected| expected.eq_ignore_ascii_case(actual_hex))
            .unwrap_or(false)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stream a file through sha256 and return the lowercase hex digest.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_content_id_accepts_remote_forms() {
        assert!(ContentId::new(format!("sha256:{HELLO_SHA256}")).is_ok());
        assert!(ContentId::new(format!("sha256.{HELLO_SHA256}")).is_ok());
        assert!(ContentId::new("e3b0c44298fc1c149afbf4c8996fb924").is_ok());
    }

    #[test]
    fn test_content_id_rejects_path_components() {
        assert!(ContentId::new("").is_err());
        assert!(ContentId::new("..").is_err());
        assert!(ContentId::new(".hidden").is_err());
        assert!(ContentId::new("sha256/abc").is_err());
        assert!(ContentId::new("abc def").is_err());
        assert!(ContentId::new("a".repeat(MAX_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_sha256_hex() {
        let oci = ContentId::new(format!("sha256:{HELLO_SHA256}")).unwrap();
        let library = ContentId::new(format!("sha256.{HELLO_SHA256}")).unwrap();
        let commit = ContentId::new("0123abcd").unwrap();
        let short = ContentId::new("sha256:abc").unwrap();

        assert_eq!(oci.sha256_hex(), Some(HELLO_SHA256));
        assert_eq!(library.sha256_hex(), Some(HELLO_SHA256));
        assert_eq!(commit.sha256_hex(), None);
        assert_eq!(short.sha256_hex(), None);
    }

    #[test]
    fn test_matches_sha256_is_case_insensitive() {
        let id = ContentId::new(format!("sha256:{}", HELLO_SHA256.to_uppercase())).unwrap();
        assert!(id.matches_sha256(HELLO_SHA256));
        assert!(!id.matches_sha256(&"0".repeat(64)));
    }

    #[test]
    fn test_sha256_of_and_file_agree() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();

        let actual = sha256_file(file.path()).unwrap();
        assert_eq!(actual, HELLO_SHA256);
        assert!(ContentId::sha256_of(b"hello").matches_sha256(&actual));
    }
}
