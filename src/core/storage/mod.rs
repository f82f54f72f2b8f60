// src/core/storage/mod.rs

//! The persistence interface of the server and the built-in in-memory
//! driver. Drivers are assumed internally thread-safe; the facade performs
//! the access control.

mod memory;

pub use memory::MemoryDriver;

use crate::core::FospError;
use crate::core::object::Object;
use crate::core::url::Url;
use async_trait::async_trait;
use bytes::Bytes;

/// The operations every storage driver provides.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Checks a name/password pair. Unknown users simply fail.
    async fn authenticate(&self, name: &str, password: &str) -> bool;

    /// Creates a user and their root object atomically. The root carries
    /// its URL. Duplicate names are a conflict.
    async fn register(&self, name: &str, password: &str, root: Object) -> Result<(), FospError>;

    /// Loads the object with its ancestor chain materialised through the
    /// parent pointers, root first.
    async fn get_object_with_parents(&self, url: &Url) -> Result<Object, FospError>;

    /// Saves a new object. The parent must already exist.
    async fn create_object(&self, url: &Url, object: &Object) -> Result<(), FospError>;

    /// Replaces the stored object.
    async fn update_object(&self, url: &Url, object: &Object) -> Result<(), FospError>;

    /// Removes the object and every descendant.
    async fn delete_objects(&self, url: &Url) -> Result<(), FospError>;

    /// The basenames of the object's direct children.
    async fn list_objects(&self, url: &Url) -> Result<Vec<String>, FospError>;

    /// Reads the attached file of the object.
    async fn read_attachment(&self, url: &Url) -> Result<Bytes, FospError>;

    /// Writes the attached file of the object, returning the number of
    /// bytes written.
    async fn write_attachment(&self, url: &Url, data: Bytes) -> Result<u64, FospError>;
}
