//! Dapp origin identity.
//!
//! An origin is the string a client asserts about itself when it connects,
//! typically a web origin such as `https://dapp.example`. It is the isolation
//! boundary between dapps: approvals, offer visibility and petname
//! suggestions are all scoped by it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The asserted origin of a connecting dapp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DappOrigin(String);

impl DappOrigin {
    /// The origin as it was asserted.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scheme part (`https` for `https://dapp.example`), if any.
    pub fn scheme(&self) -> Option<&str> {
        self.0.split_once("://").map(|(scheme, _)| scheme)
    }

    /// The host part, with any scheme stripped.
    pub fn host(&self) -> &str {
        self.0
            .split_once("://")
            .map_or(self.0.as_str(), |(_, host)| host)
    }
}

impl fmt::Display for DappOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DappOrigin {
    type Err = OriginParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(OriginParseError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(OriginParseError::Whitespace(s.to_string()));
        }
        if let Some((scheme, host)) = s.split_once("://")
            && (scheme.is_empty() || host.is_empty())
        {
            return Err(OriginParseError::Incomplete(s.to_string()));
        }

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for DappOrigin {
    type Error = OriginParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DappOrigin> for String {
    fn from(origin: DappOrigin) -> Self {
        origin.0
    }
}

/// Error parsing an origin string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OriginParseError {
    #[error("dapp origin cannot be empty")]
    Empty,
    #[error("dapp origin cannot contain whitespace, got: {0}")]
    Whitespace(String),
    #[error("dapp origin is missing its scheme or host: {0}")]
    Incomplete(String),
}
