// src/core/acl/list.rs

use super::AccessControlEntry;
use crate::core::FospError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The four-section access control list carried by every object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessControlList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<AccessControlEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub users: BTreeMap<String, AccessControlEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, AccessControlEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub others: Option<AccessControlEntry>,
}

impl AccessControlList {
    pub fn new() -> Self {
        AccessControlList::default()
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_none()
            && self.users.is_empty()
            && self.groups.is_empty()
            && self.others.is_none()
    }

    /// Component-wise overlay with `upper` taking precedence. The user and
    /// group maps are union-merged, overlaying entries present in both.
    pub fn overlay(&self, upper: &AccessControlList) -> AccessControlList {
        AccessControlList {
            owner: overlay_slot(&self.owner, &upper.owner),
            users: overlay_map(&self.users, &upper.users),
            groups: overlay_map(&self.groups, &upper.groups),
            others: overlay_slot(&self.others, &upper.others),
        }
    }

    /// Applies a patch object to this list.
    ///
    /// `owner` and `others` recurse into entry patches; `users` and `groups`
    /// take objects whose values are entry patches or `null` to remove the
    /// entry. Any wrong-typed field fails the whole patch.
    pub fn patch(&mut self, patch: &serde_json::Map<String, Value>) -> Result<(), FospError> {
        for (key, value) in patch {
            match key.as_str() {
                "owner" => patch_slot(&mut self.owner, key, value)?,
                "others" => patch_slot(&mut self.others, key, value)?,
                "users" => patch_map(&mut self.users, key, value)?,
                "groups" => patch_map(&mut self.groups, key, value)?,
                other => {
                    return Err(FospError::BadRequest(format!(
                        "unknown ACL section \"{other}\""
                    )));
                }
            }
        }
        Ok(())
    }
}

fn overlay_slot(
    lower: &Option<AccessControlEntry>,
    upper: &Option<AccessControlEntry>,
) -> Option<AccessControlEntry> {
    match (lower, upper) {
        (Some(lower), Some(upper)) => Some(lower.overlay(upper)),
        (Some(lower), None) => Some(lower.clone()),
        (None, upper) => upper.clone(),
    }
}

fn overlay_map(
    lower: &BTreeMap<String, AccessControlEntry>,
    upper: &BTreeMap<String, AccessControlEntry>,
) -> BTreeMap<String, AccessControlEntry> {
    let mut result = lower.clone();
    for (key, upper_entry) in upper {
        match result.get_mut(key) {
            Some(entry) => *entry = entry.overlay(upper_entry),
            None => {
                result.insert(key.clone(), upper_entry.clone());
            }
        }
    }
    result
}

fn patch_slot(
    slot: &mut Option<AccessControlEntry>,
    field: &str,
    value: &Value,
) -> Result<(), FospError> {
    match value {
        Value::Null => {
            *slot = None;
            Ok(())
        }
        Value::Object(entry_patch) => {
            let entry = slot.get_or_insert_with(AccessControlEntry::new);
            entry.patch(entry_patch)
        }
        _ => Err(FospError::BadRequest(format!(
            "field \"{field}\" does not contain an object or null"
        ))),
    }
}

fn patch_map(
    map: &mut BTreeMap<String, AccessControlEntry>,
    field: &str,
    value: &Value,
) -> Result<(), FospError> {
    match value {
        Value::Null => {
            map.clear();
            Ok(())
        }
        Value::Object(entries) => {
            for (name, entry_value) in entries {
                match entry_value {
                    Value::Null => {
                        map.remove(name);
                    }
                    Value::Object(entry_patch) => {
                        map.entry(name.clone())
                            .or_insert_with(AccessControlEntry::new)
                            .patch(entry_patch)?;
                    }
                    _ => {
                        return Err(FospError::BadRequest(format!(
                            "entry \"{name}\" in \"{field}\" is not an object or null"
                        )));
                    }
                }
            }
            Ok(())
        }
        _ => Err(FospError::BadRequest(format!(
            "field \"{field}\" does not contain an object or null"
        ))),
    }
}
