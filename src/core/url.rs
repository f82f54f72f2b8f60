// src/core/url.rs

//! FOSP resource URLs of the form `user@domain/path/segments`.

use crate::core::FospError;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// The optional scheme prefix accepted (and stripped) by the parser.
const SCHEME_PREFIX: &str = "fosp://";

/// A parsed FOSP URL. The root of a user's tree has an empty path.
///
/// The distinguished wildcard URL (empty user) renders as `*` and is used
/// by requests that do not target a resource, such as CONNECT and AUTH.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Url {
    user: String,
    domain: String,
    path: Vec<String>,
}

impl Url {
    /// The wildcard URL, rendered as `*`.
    pub fn wildcard() -> Self {
        Url::default()
    }

    /// The root URL of a user's tree.
    pub fn root(user: &str, domain: &str) -> Self {
        Url {
            user: user.to_string(),
            domain: domain.to_string(),
            path: Vec::new(),
        }
    }

    /// Parses a string into a `Url`.
    ///
    /// The user part is case sensitive; the domain keeps its original case
    /// but compares case-insensitively via [`Url::same_domain`]. Path
    /// normalisation drops empty and `.` segments, so `a@b//x/`, `a@b/x/.`
    /// and `a@b/x` are the same resource.
    pub fn parse(s: &str) -> Result<Self, FospError> {
        if s == "*" {
            return Ok(Url::wildcard());
        }
        let s = s.strip_prefix(SCHEME_PREFIX).unwrap_or(s);
        let Some(at) = s.find('@') else {
            return Err(FospError::InvalidUrl(format!("missing '@' in \"{s}\"")));
        };
        let user = &s[..at];
        if user.is_empty() {
            return Err(FospError::InvalidUrl(format!("empty user in \"{s}\"")));
        }
        let rest = &s[at + 1..];
        let (domain, raw_path) = match rest.find('/') {
            Some(slash) => (&rest[..slash], &rest[slash + 1..]),
            None => (rest, ""),
        };
        if domain.is_empty() {
            return Err(FospError::InvalidUrl(format!("empty domain in \"{s}\"")));
        }
        let path: Vec<String> = raw_path
            .split('/')
            .filter(|seg| !seg.is_empty() && *seg != ".")
            .map(str::to_string)
            .collect();
        Ok(Url {
            user: user.to_string(),
            domain: domain.to_string(),
            path,
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn is_wildcard(&self) -> bool {
        self.user.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// The last path segment, or `None` at the root.
    pub fn basename(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }

    /// Case-insensitive domain comparison.
    pub fn same_domain(&self, domain: &str) -> bool {
        self.domain.eq_ignore_ascii_case(domain)
    }

    /// The owning user rendered as `user@domain`.
    pub fn owner_id(&self) -> String {
        format!("{}@{}", self.user, self.domain)
    }

    /// The URL one level up. Idempotent at the root.
    pub fn parent(&self) -> Url {
        let mut parent = self.clone();
        parent.path.pop();
        parent
    }

    /// A child of this URL.
    pub fn child(&self, segment: &str) -> Url {
        let mut child = self.clone();
        child.path.push(segment.to_string());
        child
    }

    /// The ordered ancestry `[self, parent, .., root]`, free of duplicates.
    pub fn family(&self) -> Vec<Url> {
        let mut family = Vec::with_capacity(self.path.len() + 1);
        let mut current = self.clone();
        loop {
            let is_root = current.is_root();
            family.push(current.clone());
            if is_root {
                break;
            }
            current = current.parent();
        }
        family
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            return write!(f, "*");
        }
        write!(f, "{}@{}", self.user, self.domain)?;
        for segment in &self.path {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl Serialize for Url {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Url {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Url::parse(&s).map_err(de::Error::custom)
    }
}
