//! Capsule keys: what a caller asks the mesh for: a name or a content digest.

use std::fmt;
use std::str::FromStr;

use capsule_mesh_core::path_validation::{validate_capsule_name, NameError};
use capsule_mesh_core::Capsule;

const DIGEST_PREFIX: &str = "sha256:";

/// Key of a fetch: a store name, or the hex SHA-256 of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CapsuleKey {
    Name(String),
    /// Lowercase hex digest.
    Digest(String),
}

impl CapsuleKey {
    /// `sha256:<hex>` or a bare 64-char hex string is a digest; anything else must be a valid name.
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        let raw = raw.trim();
        if let Some(hex) = raw.strip_prefix(DIGEST_PREFIX) {
            if is_digest(hex) {
                return Ok(CapsuleKey::Digest(hex.to_ascii_lowercase()));
            }
            return Err(NameError::InvalidCharacters(raw.to_string()));
        }
        if is_digest(raw) {
            return Ok(CapsuleKey::Digest(raw.to_ascii_lowercase()));
        }
        validate_capsule_name(raw)?;
        Ok(CapsuleKey::Name(raw.to_string()))
    }

    /// Whether `capsule` is an answer to this key. Says nothing about trust.
    pub fn matches(&self, capsule: &Capsule) -> bool {
        match self {
            CapsuleKey::Name(name) => capsule.name == *name,
            CapsuleKey::Digest(digest) => capsule.digest.eq_ignore_ascii_case(digest),
        }
    }
}

pub(crate) fn is_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

impl fmt::Display for CapsuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapsuleKey::Name(name) => f.write_str(name),
            CapsuleKey::Digest(digest) => write!(f, "{DIGEST_PREFIX}{digest}"),
        }
    }
}

impl FromStr for CapsuleKey {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CapsuleKey::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_mesh_core::{hash, Keypair};

    #[test]
    fn test_parse_names_and_digests() {
        let digest = hash(b"x");
        assert_eq!(
            CapsuleKey::parse("notes").unwrap(),
            CapsuleKey::Name("notes".into())
        );
        assert_eq!(
            CapsuleKey::parse(&digest).unwrap(),
            CapsuleKey::Digest(digest.clone())
        );
        assert_eq!(
            CapsuleKey::parse(&format!("sha256:{}", digest.to_uppercase())).unwrap(),
            CapsuleKey::Digest(digest.clone())
        );
        assert!(CapsuleKey::parse("sha256:abc").is_err());
        assert!(CapsuleKey::parse("../x").is_err());
    }

    #[test]
    fn test_display_roundtrips() {
        let key = CapsuleKey::Digest(hash(b"y"));
        assert_eq!(key.to_string().parse::<CapsuleKey>().unwrap(), key);
    }

    #[test]
    fn test_matches() {
        let capsule = Capsule::publish("doc", b"body".to_vec(), &Keypair::generate()).unwrap();
        assert!(CapsuleKey::Name("doc".into()).matches(&capsule));
        assert!(!CapsuleKey::Name("other".into()).matches(&capsule));
        assert!(CapsuleKey::Digest(hash(b"body")).matches(&capsule));
        assert!(!CapsuleKey::Digest(hash(b"else")).matches(&capsule));
    }
}
