//! Runtime asset references

use crate::{validate_name, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A downloadable dependency bundle, addressed by the sha256 of its content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Asset name
    pub name: String,
    /// Download location
    pub url: String,
    /// Lowercase hex sha256 of the downloaded body
    #[serde(rename = "sha256", alias = "hash")]
    pub hash: String,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Asset {
    /// Create an asset reference
    pub fn new(name: impl Into<String>, url: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            hash: hash.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Validate name, URL and hash format
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name("asset", &self.name)?;
        if self.url.is_empty() {
            return Err(ValidationError::EmptyField {
                kind: "asset",
                field: "url",
            });
        }
        let is_sha256 = self.hash.len() == 64
            && self
                .hash
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !is_sha256 {
            return Err(ValidationError::InvalidHash {
                name: self.name.clone(),
                hash: self.hash.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae";

    #[test]
    fn test_validate_hash() {
        assert!(Asset::new("tool", "http://example.com/tool", HASH).validate().is_ok());

        let upper = Asset::new("tool", "http://example.com/tool", HASH.to_uppercase());
        assert!(matches!(upper.validate(), Err(ValidationError::InvalidHash { .. })));

        let short = Asset::new("tool", "http://example.com/tool", "abc");
        assert!(short.validate().is_err());

        let no_url = Asset::new("tool", "", HASH);
        assert!(matches!(no_url.validate(), Err(ValidationError::EmptyField { field: "url", .. })));
    }

    #[test]
    fn test_hash_field_aliases() {
        let json = format!(r#"{{"name":"tool","url":"http://x/t","sha256":"{}"}}"#, HASH);
        let asset: Asset = serde_json::from_str(&json).unwrap();
        assert_eq!(asset.hash, HASH);
    }
}
