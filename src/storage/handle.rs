//! Capability traits for the host storage API
//!
//! Handles are opaque. They are only meaningful within the process that acquired
//! them and must not be compared beyond identity or persisted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;

/// Options for resolving a named entry under a directory
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GetHandleOptions {
    /// Create the entry when it does not exist yet
    pub create: bool,
}

impl GetHandleOptions {
    pub fn create() -> Self {
        Self { create: true }
    }

    pub fn existing() -> Self {
        Self { create: false }
    }
}

/// A single command sent to a writable stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteCommand {
    /// Write at the current cursor
    Data(Vec<u8>),
    /// Write at `position` (or the cursor); the gap past the end is zero-filled
    Write { position: Option<u64>, data: Vec<u8> },
    /// Move the cursor
    Seek { position: u64 },
    /// Resize the buffer, zero-extending when it grows
    Truncate { size: u64 },
}

impl From<&str> for WriteCommand {
    fn from(text: &str) -> Self {
        Self::Data(text.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for WriteCommand {
    fn from(data: Vec<u8>) -> Self {
        Self::Data(data)
    }
}

/// Entry point into a host's per-origin storage
#[async_trait]
pub trait StorageHost: Send + Sync {
    type Root: DirectoryHandle;

    /// Obtain the storage root for this origin.
    ///
    /// Fails with [`StorageError::Security`] when the host will not map a storage
    /// area for the origin.
    async fn get_directory(&self) -> Result<Self::Root, StorageError>;
}

#[async_trait]
pub trait DirectoryHandle: Send + Sync + Sized {
    type File: FileHandle;

    fn name(&self) -> &str;

    /// Resolve a file entry, creating it when `options.create` is set.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotAllowed`] if permission is not granted
    /// - [`StorageError::TypeMismatch`] if the entry is a directory
    /// - [`StorageError::NotFound`] if the entry is absent and `create` is false
    /// - [`StorageError::InvalidName`] if `name` is not a valid entry name
    async fn get_file_handle(
        &self,
        name: &str,
        options: GetHandleOptions,
    ) -> Result<Self::File, StorageError>;

    /// Resolve a child directory; same error contract as [`get_file_handle`](Self::get_file_handle)
    async fn get_directory_handle(
        &self,
        name: &str,
        options: GetHandleOptions,
    ) -> Result<Self, StorageError>;

    async fn remove_entry(&self, name: &str, recursive: bool) -> Result<(), StorageError>;
}

#[async_trait]
pub trait FileHandle: Send + Sync {
    type Writable: WritableFileStream;
    type Snapshot: FileSnapshot;

    fn name(&self) -> &str;

    /// Open a writer holding the exclusive lock on this entry.
    ///
    /// The writer starts from empty content; nothing reaches the entry until
    /// [`WritableFileStream::close`] succeeds.
    async fn create_writable(&self) -> Result<Self::Writable, StorageError>;

    /// Capture the entry's current state.
    ///
    /// Must not be called while a write on the same entry is in flight. A snapshot
    /// taken then fails with [`StorageError::NotReadable`] once read.
    async fn get_file(&self) -> Result<Self::Snapshot, StorageError>;
}

#[async_trait]
pub trait WritableFileStream: Send {
    async fn write(&mut self, command: WriteCommand) -> Result<(), StorageError>;

    /// Commit the written content and release the lock
    async fn close(&mut self) -> Result<(), StorageError>;
}

#[async_trait]
pub trait FileSnapshot: Send + Sync {
    fn name(&self) -> &str;

    fn size(&self) -> u64;

    fn last_modified(&self) -> DateTime<Utc>;

    async fn bytes(&self) -> Result<Vec<u8>, StorageError>;

    /// Content decoded as UTF-8, invalid sequences replaced
    async fn text(&self) -> Result<String, StorageError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
