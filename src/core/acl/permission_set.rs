// src/core/acl/permission_set.rs

use crate::core::FospError;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A single permission token. Negative tokens explicitly revoke the right
/// even when an outer layer grants it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    NotRead,
    Write,
    NotWrite,
    Delete,
    NotDelete,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::NotRead => "not-read",
            Permission::Write => "write",
            Permission::NotWrite => "not-write",
            Permission::Delete => "delete",
            Permission::NotDelete => "not-delete",
        }
    }

    /// The token that cancels this one.
    pub fn negation(self) -> Permission {
        match self {
            Permission::Read => Permission::NotRead,
            Permission::NotRead => Permission::Read,
            Permission::Write => Permission::NotWrite,
            Permission::NotWrite => Permission::Write,
            Permission::Delete => Permission::NotDelete,
            Permission::NotDelete => Permission::Delete,
        }
    }

    pub fn is_negative(self) -> bool {
        matches!(
            self,
            Permission::NotRead | Permission::NotWrite | Permission::NotDelete
        )
    }
}

impl FromStr for Permission {
    type Err = FospError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Permission::Read),
            "not-read" => Ok(Permission::NotRead),
            "write" => Ok(Permission::Write),
            "not-write" => Ok(Permission::NotWrite),
            "delete" => Ok(Permission::Delete),
            "not-delete" => Ok(Permission::NotDelete),
            other => Err(FospError::BadRequest(format!(
                "unknown permission \"{other}\""
            ))),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// An ordered set of permission tokens.
///
/// Adding a token removes its negation, so within one set the last write
/// wins. Combining two sets is done with [`PermissionSet::overlay`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    set: Vec<Permission>,
}

impl PermissionSet {
    pub fn new() -> Self {
        PermissionSet::default()
    }

    /// The full positive permission set.
    pub fn all() -> Self {
        PermissionSet {
            set: vec![Permission::Read, Permission::Write, Permission::Delete],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.set.contains(&permission)
    }

    /// Inserts `permission`, dropping its negation first.
    pub fn add(&mut self, permission: Permission) {
        self.set.retain(|p| *p != permission.negation());
        if !self.set.contains(&permission) {
            self.set.push(permission);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.set.iter().copied()
    }

    /// Combines this set (the lower layer) with `upper`.
    ///
    /// Every token of `upper` is kept; a token of `self` survives only when
    /// `upper` mentions neither it nor its negation. An explicit negation in
    /// the upper layer therefore revokes a right granted further down.
    pub fn overlay(&self, upper: &PermissionSet) -> PermissionSet {
        let mut result = upper.clone();
        for permission in self.iter() {
            if !upper.contains(permission) && !upper.contains(permission.negation()) {
                result.set.push(permission);
            }
        }
        result
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut set = PermissionSet::new();
        for permission in iter {
            set.add(permission);
        }
        set
    }
}

impl Serialize for PermissionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.set.len()))?;
        for permission in &self.set {
            seq.serialize_element(permission)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for PermissionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SetVisitor;

        impl<'de> Visitor<'de> for SetVisitor {
            type Value = PermissionSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an array of permission tokens")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut set = PermissionSet::new();
                while let Some(permission) = seq.next_element::<Permission>()? {
                    set.add(permission);
                }
                Ok(set)
            }
        }

        deserializer.deserialize_seq(SetVisitor)
    }
}
