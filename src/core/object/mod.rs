// src/core/object/mod.rs

//! The per-node object record: metadata, ACL, subscriptions, attachment
//! descriptor and free-form data, plus the reduced-ACL computation.

mod patch;

pub use patch::{PatchObject, merge_json, parse_patch};

use crate::core::FospError;
use crate::core::acl::{AccessControlEntry, AccessControlList, Permission, PermissionSet};
use crate::core::url::Url;
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The change events an object subscription can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Created,
    Updated,
    Deleted,
}

impl Event {
    /// The wire keyword of the notification carrying this event.
    pub fn as_keyword(self) -> &'static str {
        match self {
            Event::Created => "CREATED",
            Event::Updated => "UPDATED",
            Event::Deleted => "DELETED",
        }
    }
}

impl FromStr for Event {
    type Err = FospError;

    // Subscriptions in stored objects spell events in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("created") {
            Ok(Event::Created)
        } else if s.eq_ignore_ascii_case("updated") {
            Ok(Event::Updated)
        } else if s.eq_ignore_ascii_case("deleted") {
            Ok(Event::Deleted)
        } else {
            Err(FospError::BadRequest(format!("unknown event \"{s}\"")))
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_keyword())
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            Event::Created => "created",
            Event::Updated => "updated",
            Event::Deleted => "deleted",
        })
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// One entry in an object's subscriptions map.
///
/// `depth == -1` subscribes to the whole subtree; `depth >= 0` limits the
/// subscription to events at most that many levels below the object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub depth: i64,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Subscription {
    /// Whether this subscription covers `event` at `distance` levels below
    /// the subscribed object.
    pub fn covers(&self, event: Event, distance: i64) -> bool {
        (self.depth == -1 || self.depth >= distance) && self.events.contains(&event)
    }

    fn patch(&mut self, patch: &serde_json::Map<String, Value>) -> Result<(), FospError> {
        for (key, value) in patch {
            match (key.as_str(), value) {
                ("depth", Value::Number(n)) => {
                    self.depth = n.as_i64().ok_or_else(|| {
                        FospError::BadRequest("subscription depth is not an integer".to_string())
                    })?;
                }
                ("events", Value::Array(events)) => {
                    let mut parsed = Vec::with_capacity(events.len());
                    for event in events {
                        let Value::String(name) = event else {
                            return Err(FospError::BadRequest(
                                "subscription events must be strings".to_string(),
                            ));
                        };
                        parsed.push(name.parse::<Event>()?);
                    }
                    self.events = parsed;
                }
                (field @ ("depth" | "events"), _) => {
                    return Err(FospError::BadRequest(format!(
                        "subscription field \"{field}\" has the wrong type"
                    )));
                }
                (other, _) => {
                    return Err(FospError::BadRequest(format!(
                        "unknown subscription field \"{other}\""
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The descriptor of a binary file attached to an object. The size is
/// maintained by the server to match the bytes actually written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

impl Attachment {
    fn patch(&mut self, patch: &serde_json::Map<String, Value>) -> Result<(), FospError> {
        for (key, value) in patch {
            match (key.as_str(), value) {
                ("name", Value::String(name)) => self.name = name.clone(),
                ("name", Value::Null) => self.name.clear(),
                ("type", Value::String(kind)) => self.kind = kind.clone(),
                ("type", Value::Null) => self.kind.clear(),
                (field @ ("name" | "type"), _) => {
                    return Err(FospError::BadRequest(format!(
                        "attachment field \"{field}\" does not contain a string or null"
                    )));
                }
                (other, _) => {
                    return Err(FospError::BadRequest(format!(
                        "attachment field \"{other}\" cannot be patched"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One node in a user's object tree. The parent chain is materialised at
/// load time and treated as read only by everything downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Object {
    #[serde(skip)]
    pub url: Url,
    #[serde(skip)]
    pub parent: Option<Box<Object>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub btime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    #[serde(default, skip_serializing_if = "AccessControlList::is_empty")]
    pub acl: AccessControlList,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subscriptions: BTreeMap<String, Subscription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Object {
    /// The root object provisioned when a user registers: owned by the user,
    /// with the full positive permission set on every facet.
    pub fn provision_root(owner: &str, now: DateTime<Utc>) -> Object {
        let mut acl = AccessControlList::new();
        acl.owner = Some(AccessControlEntry::all());
        Object {
            btime: Some(now),
            mtime: Some(now),
            owner: owner.to_string(),
            acl,
            ..Object::default()
        }
    }

    /// The object's ACL with all ancestors' ACLs overlaid onto it.
    pub fn reduced_acl(&self) -> AccessControlList {
        match &self.parent {
            None => self.acl.clone(),
            Some(parent) => parent.reduced_acl().overlay(&self.acl),
        }
    }

    pub fn permissions_for_data(&self, user: &str, groups: &[String]) -> PermissionSet {
        self.effective_permissions(user, groups, |ace| &ace.data)
    }

    pub fn permissions_for_acl(&self, user: &str, groups: &[String]) -> PermissionSet {
        self.effective_permissions(user, groups, |ace| &ace.acl)
    }

    pub fn permissions_for_subscriptions(&self, user: &str, groups: &[String]) -> PermissionSet {
        self.effective_permissions(user, groups, |ace| &ace.subscriptions)
    }

    pub fn permissions_for_children(&self, user: &str, groups: &[String]) -> PermissionSet {
        self.effective_permissions(user, groups, |ace| &ace.children)
    }

    /// The effective permission set of `user` for one facet: on the reduced
    /// ACL, the overlay of others, then each matching group, then the user
    /// entry, then the owner entry when `user` owns the object.
    fn effective_permissions<F>(&self, user: &str, groups: &[String], facet: F) -> PermissionSet
    where
        F: Fn(&AccessControlEntry) -> &PermissionSet,
    {
        let reduced = self.reduced_acl();
        let mut effective = reduced
            .others
            .as_ref()
            .map(|ace| facet(ace).clone())
            .unwrap_or_default();
        for group in groups {
            if let Some(ace) = reduced.groups.get(group) {
                effective = effective.overlay(facet(ace));
            }
        }
        if let Some(ace) = reduced.users.get(user) {
            effective = effective.overlay(facet(ace));
        }
        if user == self.owner
            && let Some(ace) = &reduced.owner
        {
            effective = effective.overlay(facet(ace));
        }
        effective
    }

    /// All users subscribed to `event` on this object or an ancestor whose
    /// subscription depth covers the distance. Ancestors are visited first
    /// and each user appears once.
    pub fn subscribed_users(&self, event: Event, distance: i64) -> Vec<String> {
        let mut users = match &self.parent {
            Some(parent) => parent.subscribed_users(event, distance + 1),
            None => Vec::new(),
        };
        for (user, subscription) in &self.subscriptions {
            if !users.iter().any(|u| u == user) && subscription.covers(event, distance) {
                users.push(user.clone());
            }
        }
        users
    }

    /// A sanitised copy for `user`: timestamps and owner always included,
    /// facets stripped where the user lacks the read permission.
    pub fn user_view(&self, user: &str, groups: &[String]) -> Object {
        let mut view = Object {
            url: self.url.clone(),
            btime: self.btime,
            mtime: self.mtime,
            owner: self.owner.clone(),
            ..Object::default()
        };
        if self
            .permissions_for_data(user, groups)
            .contains(Permission::Read)
        {
            view.data = self.data.clone();
            view.kind = self.kind.clone();
            view.attachment = self.attachment.clone();
        }
        if self
            .permissions_for_acl(user, groups)
            .contains(Permission::Read)
        {
            view.acl = self.acl.clone();
        }
        if self
            .permissions_for_subscriptions(user, groups)
            .contains(Permission::Read)
        {
            view.subscriptions = self.subscriptions.clone();
        }
        view
    }

    /// Whether `user` may read any facet of this object at all. Used to
    /// decide between an empty view and a Forbidden answer.
    pub fn readable_by(&self, user: &str, groups: &[String]) -> bool {
        self.permissions_for_data(user, groups)
            .contains(Permission::Read)
            || self
                .permissions_for_acl(user, groups)
                .contains(Permission::Read)
            || self
                .permissions_for_subscriptions(user, groups)
                .contains(Permission::Read)
    }

    /// Applies a patch to this object. Timestamps and the owner are managed
    /// by the server and cannot be patched; any wrong-typed field fails the
    /// whole patch.
    pub fn patch(&mut self, patch: &PatchObject) -> Result<(), FospError> {
        for (key, value) in patch {
            match (key.as_str(), value) {
                ("acl", Value::Null) => self.acl = AccessControlList::new(),
                ("acl", Value::Object(acl_patch)) => self.acl.patch(acl_patch)?,
                ("subscriptions", Value::Null) => self.subscriptions.clear(),
                ("subscriptions", Value::Object(entries)) => {
                    self.patch_subscriptions(entries)?;
                }
                ("attachment", Value::Null) => self.attachment = None,
                ("attachment", Value::Object(attachment_patch)) => {
                    self.attachment
                        .get_or_insert_with(Attachment::default)
                        .patch(attachment_patch)?;
                }
                ("type", Value::Null) => self.kind = None,
                ("type", other) => self.kind = Some(other.clone()),
                ("data", Value::Null) => self.data = None,
                ("data", Value::Object(data_patch)) => match &mut self.data {
                    Some(Value::Object(existing)) => merge_json(existing, data_patch),
                    _ => self.data = Some(Value::Object(data_patch.clone())),
                },
                ("data", other) => self.data = Some(other.clone()),
                (field @ ("acl" | "subscriptions" | "attachment"), _) => {
                    return Err(FospError::BadRequest(format!(
                        "field \"{field}\" does not contain an object or null"
                    )));
                }
                (other, _) => {
                    return Err(FospError::BadRequest(format!(
                        "field \"{other}\" cannot be patched"
                    )));
                }
            }
        }
        Ok(())
    }

    fn patch_subscriptions(
        &mut self,
        entries: &serde_json::Map<String, Value>,
    ) -> Result<(), FospError> {
        for (user, entry) in entries {
            match entry {
                Value::Null => {
                    self.subscriptions.remove(user);
                }
                Value::Object(subscription_patch) => {
                    self.subscriptions
                        .entry(user.clone())
                        .or_default()
                        .patch(subscription_patch)?;
                }
                _ => {
                    return Err(FospError::BadRequest(format!(
                        "subscription for \"{user}\" is not an object or null"
                    )));
                }
            }
        }
        Ok(())
    }
}
