// src/core/acl/entry.rs

use super::{Permission, PermissionSet};
use crate::core::FospError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One access control entry: a permission set per resource facet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessControlEntry {
    #[serde(default, skip_serializing_if = "PermissionSet::is_empty")]
    pub data: PermissionSet,
    #[serde(default, skip_serializing_if = "PermissionSet::is_empty")]
    pub acl: PermissionSet,
    #[serde(default, skip_serializing_if = "PermissionSet::is_empty")]
    pub subscriptions: PermissionSet,
    #[serde(default, skip_serializing_if = "PermissionSet::is_empty")]
    pub children: PermissionSet,
}

impl AccessControlEntry {
    pub fn new() -> Self {
        AccessControlEntry::default()
    }

    /// The entry granting every positive permission on every facet, as
    /// provisioned for the owner of a freshly registered root object.
    pub fn all() -> Self {
        AccessControlEntry {
            data: PermissionSet::all(),
            acl: PermissionSet::all(),
            subscriptions: PermissionSet::all(),
            children: PermissionSet::all(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
            && self.acl.is_empty()
            && self.subscriptions.is_empty()
            && self.children.is_empty()
    }

    /// Component-wise overlay, `upper` taking precedence.
    pub fn overlay(&self, upper: &AccessControlEntry) -> AccessControlEntry {
        AccessControlEntry {
            data: self.data.overlay(&upper.data),
            acl: self.acl.overlay(&upper.acl),
            subscriptions: self.subscriptions.overlay(&upper.subscriptions),
            children: self.children.overlay(&upper.children),
        }
    }

    /// Applies a patch object to this entry.
    ///
    /// A facet key mapped to `null` resets that facet, an array replaces it
    /// wholesale. Any other value type fails the whole patch.
    pub fn patch(&mut self, patch: &serde_json::Map<String, Value>) -> Result<(), FospError> {
        for (key, value) in patch {
            let slot = match key.as_str() {
                "data" => &mut self.data,
                "acl" => &mut self.acl,
                "subscriptions" => &mut self.subscriptions,
                "children" => &mut self.children,
                other => {
                    return Err(FospError::BadRequest(format!(
                        "unknown ACL entry facet \"{other}\""
                    )));
                }
            };
            *slot = permission_set_from_value(key, value)?;
        }
        Ok(())
    }
}

fn permission_set_from_value(field: &str, value: &Value) -> Result<PermissionSet, FospError> {
    match value {
        Value::Null => Ok(PermissionSet::new()),
        Value::Array(elements) => {
            let mut set = PermissionSet::new();
            for element in elements {
                let Value::String(token) = element else {
                    return Err(FospError::BadRequest(format!(
                        "field \"{field}\" contains a non-string permission"
                    )));
                };
                set.add(token.parse::<Permission>()?);
            }
            Ok(set)
        }
        _ => Err(FospError::BadRequest(format!(
            "field \"{field}\" does not contain an array or null"
        ))),
    }
}
