//! Storage location descriptors
//!
//! A location is `scheme://rest` where the scheme names the backend driver
//! and the rest (netloc, path, params, query, fragment - everything after
//! the scheme separator) is handed to the backend verbatim. Backends that
//! need a fragment (the online store's key-field name) receive it intact.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A parsed storage location: driver scheme plus the lossless remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    scheme: String,
    rest: String,
}

impl Location {
    /// Parse `scheme://netloc/path;params?query#fragment`.
    ///
    /// The remainder is kept byte-for-byte, so reassembling
    /// `scheme://` + `rest()` round-trips the original string.
    pub fn parse(url: &str) -> Result<Self> {
        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(Error::InvalidLocation {
                url: url.to_string(),
                reason: "missing 'scheme://' prefix".to_string(),
            });
        };
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '_'))
        {
            return Err(Error::InvalidLocation {
                url: url.to_string(),
                reason: format!("invalid scheme '{}'", scheme),
            });
        }
        Ok(Location {
            scheme: scheme.to_string(),
            rest: rest.to_string(),
        })
    }

    /// Backend driver identifier.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Everything after `scheme://`, separators included.
    pub fn rest(&self) -> &str {
        &self.rest
    }

    /// The fragment component, if any.
    pub fn fragment(&self) -> Option<&str> {
        self.rest.split_once('#').map(|(_, f)| f)
    }

    /// The remainder with any fragment removed.
    pub fn without_fragment(&self) -> &str {
        self.rest
            .split_once('#')
            .map_or(self.rest.as_str(), |(before, _)| before)
    }
}

/// A catalog-side location descriptor: either a bare URL string or a
/// structured `{url, args}` record with mode-specific arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LocationSpec {
    Bare(String),
    Structured {
        url: String,
        #[serde(default)]
        args: serde_json::Map<String, serde_json::Value>,
    },
}

impl LocationSpec {
    pub fn url(&self) -> &str {
        match self {
            LocationSpec::Bare(url) => url,
            LocationSpec::Structured { url, .. } => url,
        }
    }

    pub fn args(&self) -> serde_json::Map<String, serde_json::Value> {
        match self {
            LocationSpec::Bare(_) => serde_json::Map::new(),
            LocationSpec::Structured { args, .. } => args.clone(),
        }
    }
}
