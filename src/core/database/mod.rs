// src/core/database/mod.rs

//! The database facade: an access-controlled wrapper over the storage
//! driver that also mints change notifications after successful mutations.

mod notifications;

use crate::core::FospError;
use crate::core::acl::Permission;
use crate::core::object::{Event, Object, PatchObject};
use crate::core::state::ServerState;
use crate::core::storage::StorageDriver;
use crate::core::url::Url;
use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::debug;

/// The path of the group membership object inside every user tree.
const GROUPS_PATH: [&str; 2] = ["config", "groups"];

pub struct Database {
    driver: Arc<dyn StorageDriver>,
    localdomain: String,
    /// Back-pointer for notification routing; the state owns the database.
    server: Weak<ServerState>,
}

impl Database {
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        localdomain: String,
        server: Weak<ServerState>,
    ) -> Database {
        Database {
            driver,
            localdomain,
            server,
        }
    }

    /// Checks a name/password pair against the stored credentials.
    pub async fn authenticate(&self, name: &str, password: &str) -> bool {
        self.driver.authenticate(name, password).await
    }

    /// Creates a new user together with its root object. The root is owned
    /// by the new user, who gets the full positive permission set on it.
    pub async fn register(&self, name: &str, password: &str) -> Result<(), FospError> {
        let owner = format!("{name}@{}", self.localdomain);
        let mut root = Object::provision_root(&owner, Utc::now());
        root.url = Url::root(name, &self.localdomain);
        self.driver.register(name, password, root).await
    }

    /// Loads the object and returns the caller's sanitised view of it.
    /// An object the caller may not read any facet of appears forbidden,
    /// not absent.
    pub async fn get(&self, user: &str, url: &Url) -> Result<Object, FospError> {
        let object = self.driver.get_object_with_parents(url).await?;
        let groups = self.groups_for(user, url).await;
        if !object.readable_by(user, &groups) {
            return Err(FospError::NotAuthorized);
        }
        Ok(object.user_view(user, &groups))
    }

    /// Lists the names of the object's children.
    pub async fn list(&self, user: &str, url: &Url) -> Result<Vec<String>, FospError> {
        let object = self.driver.get_object_with_parents(url).await?;
        let groups = self.groups_for(user, url).await;
        if !object
            .permissions_for_children(user, &groups)
            .contains(Permission::Read)
        {
            return Err(FospError::NotAuthorized);
        }
        self.driver.list_objects(url).await
    }

    /// Saves a new object under the given URL. The parent must exist and
    /// grant the caller write access to its children.
    pub async fn create(&self, user: &str, url: &Url, mut object: Object) -> Result<(), FospError> {
        if url.is_root() {
            return Err(FospError::BadRequest(
                "root objects are created on registration".to_string(),
            ));
        }
        let parent = self
            .driver
            .get_object_with_parents(&url.parent())
            .await
            .map_err(|e| match e {
                FospError::NotFound => FospError::ParentNotFound,
                other => other,
            })?;
        let groups = self.groups_for(user, url).await;
        if !parent
            .permissions_for_children(user, &groups)
            .contains(Permission::Write)
        {
            return Err(FospError::NotAuthorized);
        }

        let now = Utc::now();
        object.url = url.clone();
        object.parent = None;
        object.btime = Some(now);
        object.mtime = Some(now);
        object.owner = user.to_string();
        self.driver.create_object(url, &object).await?;
        self.notify_after_commit(Event::Created, url).await;
        Ok(())
    }

    /// Applies a patch. Which write permissions are required depends on
    /// which parts of the object the patch touches.
    pub async fn patch(
        &self,
        user: &str,
        url: &Url,
        patch: &PatchObject,
    ) -> Result<(), FospError> {
        let mut object = self.driver.get_object_with_parents(url).await?;
        let groups = self.groups_for(user, url).await;
        if patch.contains_key("acl")
            && !object
                .permissions_for_acl(user, &groups)
                .contains(Permission::Write)
        {
            return Err(FospError::NotAuthorized);
        }
        if patch.contains_key("subscriptions")
            && !object
                .permissions_for_subscriptions(user, &groups)
                .contains(Permission::Write)
        {
            return Err(FospError::NotAuthorized);
        }
        let touches_data = patch.contains_key("data")
            || patch.contains_key("type")
            || patch.contains_key("attachment");
        if touches_data
            && !object
                .permissions_for_data(user, &groups)
                .contains(Permission::Write)
        {
            return Err(FospError::NotAuthorized);
        }

        object.patch(patch)?;
        object.mtime = Some(Utc::now());
        self.driver.update_object(url, &object).await?;
        self.notify_after_commit(Event::Updated, url).await;
        Ok(())
    }

    /// Deletes the object and its whole subtree. Roots are indestructible.
    pub async fn delete(&self, user: &str, url: &Url) -> Result<(), FospError> {
        if url.is_root() {
            return Err(FospError::BadRequest(
                "root objects cannot be deleted".to_string(),
            ));
        }
        let object = self.driver.get_object_with_parents(url).await?;
        let groups = self.groups_for(user, url).await;
        let Some(parent) = object.parent.as_deref() else {
            return Err(FospError::Internal(
                "non-root object without a parent chain".to_string(),
            ));
        };
        if !parent
            .permissions_for_children(user, &groups)
            .contains(Permission::Delete)
        {
            return Err(FospError::NotAuthorized);
        }
        self.driver.delete_objects(url).await?;
        // The pre-delete ancestry still knows who was subscribed.
        self.dispatch_notifications(Event::Deleted, object);
        Ok(())
    }

    /// Streams the attached file of the object.
    pub async fn read_attachment(&self, user: &str, url: &Url) -> Result<Bytes, FospError> {
        let object = self.driver.get_object_with_parents(url).await?;
        let groups = self.groups_for(user, url).await;
        if !object
            .permissions_for_data(user, &groups)
            .contains(Permission::Read)
        {
            return Err(FospError::NotAuthorized);
        }
        self.driver.read_attachment(url).await
    }

    /// Stores a new attachment and records its actual size on the object.
    pub async fn write_attachment(
        &self,
        user: &str,
        url: &Url,
        data: Bytes,
    ) -> Result<u64, FospError> {
        let mut object = self.driver.get_object_with_parents(url).await?;
        let groups = self.groups_for(user, url).await;
        if !object
            .permissions_for_data(user, &groups)
            .contains(Permission::Write)
        {
            return Err(FospError::NotAuthorized);
        }
        let written = self.driver.write_attachment(url, data).await?;
        let attachment = object.attachment.get_or_insert_with(Default::default);
        attachment.size = written;
        if attachment.name.is_empty()
            && let Some(basename) = url.basename()
        {
            attachment.name = basename.to_string();
        }
        object.mtime = Some(Utc::now());
        self.driver.update_object(url, &object).await?;
        self.notify_after_commit(Event::Updated, url).await;
        Ok(written)
    }

    /// The groups of `user` in the tree the URL belongs to, read from the
    /// tree's `/config/groups` object. A missing or malformed groups
    /// object simply yields no groups.
    pub(crate) async fn groups_for(&self, user: &str, url: &Url) -> Vec<String> {
        let mut groups_url = Url::root(url.user(), url.domain());
        for segment in GROUPS_PATH {
            groups_url = groups_url.child(segment);
        }
        let Ok(object) = self.driver.get_object_with_parents(&groups_url).await else {
            return Vec::new();
        };
        let Some(Value::Object(groups)) = &object.data else {
            debug!("Groups object of {} holds no group map", url.owner_id());
            return Vec::new();
        };
        groups
            .iter()
            .filter(|(_, members)| {
                members
                    .as_array()
                    .is_some_and(|members| members.iter().any(|m| m.as_str() == Some(user)))
            })
            .map(|(group, _)| group.clone())
            .collect()
    }
}
