// src/core/storage/memory.rs

//! An in-memory storage driver. Objects live in a concurrent map keyed by
//! their rendered URL; attachments are written below the base path into
//! files named after the base32-encoded SHA-512 of the URL.

use super::StorageDriver;
use crate::core::FospError;
use crate::core::object::Object;
use crate::core::url::Url;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use data_encoding::BASE32;
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use std::path::PathBuf;
use tracing::debug;

pub struct MemoryDriver {
    users: DashMap<String, String>,
    objects: DashMap<String, Object>,
    basepath: PathBuf,
}

impl MemoryDriver {
    pub fn new(basepath: impl Into<PathBuf>) -> MemoryDriver {
        MemoryDriver {
            users: DashMap::new(),
            objects: DashMap::new(),
            basepath: basepath.into(),
        }
    }

    fn attachment_path(&self, url: &Url) -> PathBuf {
        let digest = Sha512::digest(url.to_string().as_bytes());
        self.basepath.join(BASE32.encode(&digest))
    }

    fn hash_password(password: &str) -> Result<String, FospError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| FospError::Internal(format!("password hashing failed: {e}")))
    }

    /// The stored copy of an object: no parent links, URL attached.
    fn detached(url: &Url, object: &Object) -> Object {
        let mut stored = object.clone();
        stored.url = url.clone();
        stored.parent = None;
        stored
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn authenticate(&self, name: &str, password: &str) -> bool {
        let Some(hash) = self.users.get(name) else {
            return false;
        };
        PasswordHash::new(hash.value())
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }

    async fn register(&self, name: &str, password: &str, root: Object) -> Result<(), FospError> {
        let hash = Self::hash_password(password)?;
        match self.users.entry(name.to_string()) {
            dashmap::Entry::Occupied(_) => return Err(FospError::UserAlreadyExists),
            dashmap::Entry::Vacant(entry) => {
                entry.insert(hash);
            }
        }
        let key = root.url.to_string();
        let stored = Self::detached(&root.url, &root);
        self.objects.insert(key, stored);
        Ok(())
    }

    async fn get_object_with_parents(&self, url: &Url) -> Result<Object, FospError> {
        if url.is_wildcard() {
            return Err(FospError::NotFound);
        }
        let family = url.family();
        // Build the chain root first so every node points at its loaded
        // ancestry.
        let mut chain: Option<Box<Object>> = None;
        for ancestor in family.iter().rev() {
            let Some(entry) = self.objects.get(&ancestor.to_string()) else {
                return Err(FospError::NotFound);
            };
            let mut object = entry.value().clone();
            object.url = ancestor.clone();
            object.parent = chain.take();
            chain = Some(Box::new(object));
        }
        chain
            .map(|object| *object)
            .ok_or_else(|| FospError::Internal("empty URL family".to_string()))
    }

    async fn create_object(&self, url: &Url, object: &Object) -> Result<(), FospError> {
        if !url.is_root() && !self.objects.contains_key(&url.parent().to_string()) {
            return Err(FospError::ParentNotFound);
        }
        match self.objects.entry(url.to_string()) {
            dashmap::Entry::Occupied(_) => Err(FospError::BadRequest(format!(
                "object {url} already exists"
            ))),
            dashmap::Entry::Vacant(entry) => {
                entry.insert(Self::detached(url, object));
                Ok(())
            }
        }
    }

    async fn update_object(&self, url: &Url, object: &Object) -> Result<(), FospError> {
        let key = url.to_string();
        if !self.objects.contains_key(&key) {
            return Err(FospError::NotFound);
        }
        self.objects.insert(key, Self::detached(url, object));
        Ok(())
    }

    async fn delete_objects(&self, url: &Url) -> Result<(), FospError> {
        let key = url.to_string();
        if self.objects.remove(&key).is_none() {
            return Err(FospError::NotFound);
        }
        let prefix = format!("{key}/");
        self.objects.retain(|stored, _| !stored.starts_with(&prefix));
        debug!("Deleted subtree below {url}");
        Ok(())
    }

    async fn list_objects(&self, url: &Url) -> Result<Vec<String>, FospError> {
        let key = url.to_string();
        if !self.objects.contains_key(&key) {
            return Err(FospError::NotFound);
        }
        let prefix = format!("{key}/");
        let mut names: Vec<String> = self
            .objects
            .iter()
            .filter_map(|entry| {
                let rest = entry.key().strip_prefix(&prefix)?;
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect();
        names.sort();
        Ok(names)
    }

    async fn read_attachment(&self, url: &Url) -> Result<Bytes, FospError> {
        let path = self.attachment_path(url);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FospError::NotFound),
            Err(e) => Err(FospError::Storage(format!(
                "reading attachment {}: {e}",
                path.display()
            ))),
        }
    }

    async fn write_attachment(&self, url: &Url, data: Bytes) -> Result<u64, FospError> {
        tokio::fs::create_dir_all(&self.basepath)
            .await
            .map_err(|e| FospError::Storage(format!("creating attachment directory: {e}")))?;
        let path = self.attachment_path(url);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| FospError::Storage(format!("writing attachment {}: {e}", path.display())))?;
        Ok(data.len() as u64)
    }
}
