//! In-memory storage host
//!
//! Behaves like a per-origin sandbox: permissions, a byte quota, one exclusive
//! writer per file and versioned snapshots. Every call is recorded in a journal
//! and any call can be made to fail through [`MemoryHost::fail_next`].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::handle::{
    DirectoryHandle, FileHandle, FileSnapshot, GetHandleOptions, StorageHost, WritableFileStream,
    WriteCommand,
};
use super::name::validate_entry_name;
use super::scratch::ScratchBuffer;
use crate::config::DraftConfig;
use crate::error::StorageError;

/// Host calls, as recorded in the journal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    GetDirectory,
    GetFileHandle,
    GetDirectoryHandle,
    RemoveEntry,
    CreateWritable,
    Write,
    Close,
    GetFile,
    Read,
}

#[derive(Debug)]
struct FileEntry {
    data: Vec<u8>,
    version: u64,
    modified: DateTime<Utc>,
    locked: bool,
}

#[derive(Debug, Default)]
struct DirEntry {
    children: BTreeMap<String, Node>,
}

#[derive(Debug)]
enum Node {
    File(FileEntry),
    Directory(DirEntry),
}

impl Node {
    fn is_file(&self) -> bool {
        matches!(self, Node::File(_))
    }
}

#[derive(Debug)]
struct HostState {
    root: DirEntry,
    root_denied: bool,
    read_allowed: bool,
    write_allowed: bool,
    quota: Option<u64>,
    faults: HashMap<Operation, VecDeque<StorageError>>,
    journal: Vec<Operation>,
    next_version: u64,
}

impl HostState {
    fn new() -> Self {
        Self {
            root: DirEntry::default(),
            root_denied: false,
            read_allowed: true,
            write_allowed: true,
            quota: None,
            faults: HashMap::new(),
            journal: Vec::new(),
            next_version: 1,
        }
    }

    /// Record `op` and surface an injected fault for it, if any
    fn enter(&mut self, op: Operation) -> Result<(), StorageError> {
        self.journal.push(op);
        match self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn require_read(&self) -> Result<(), StorageError> {
        if !self.read_allowed {
            return Err(StorageError::NotAllowed("read permission is not granted".into()));
        }
        Ok(())
    }

    fn require_write(&self) -> Result<(), StorageError> {
        if !self.write_allowed {
            return Err(StorageError::NotAllowed(
                "readwrite permission is not granted".into(),
            ));
        }
        Ok(())
    }

    fn bump_version(&mut self) -> u64 {
        let version = self.next_version;
        self.next_version += 1;
        version
    }

    fn new_file(&mut self) -> FileEntry {
        FileEntry {
            data: Vec::new(),
            version: self.bump_version(),
            modified: Utc::now(),
            locked: false,
        }
    }

    fn dir(&self, path: &[String]) -> Result<&DirEntry, StorageError> {
        let mut dir = &self.root;
        for segment in path {
            dir = match dir.children.get(segment) {
                Some(Node::Directory(child)) => child,
                Some(Node::File(_)) => return Err(StorageError::TypeMismatch(segment.clone())),
                None => return Err(StorageError::NotFound(segment.clone())),
            };
        }
        Ok(dir)
    }

    fn dir_mut(&mut self, path: &[String]) -> Result<&mut DirEntry, StorageError> {
        let mut dir = &mut self.root;
        for segment in path {
            dir = match dir.children.get_mut(segment) {
                Some(Node::Directory(child)) => child,
                Some(Node::File(_)) => return Err(StorageError::TypeMismatch(segment.clone())),
                None => return Err(StorageError::NotFound(segment.clone())),
            };
        }
        Ok(dir)
    }

    fn file(&self, path: &[String], name: &str) -> Result<&FileEntry, StorageError> {
        match self.dir(path)?.children.get(name) {
            Some(Node::File(entry)) => Ok(entry),
            Some(Node::Directory(_)) => Err(StorageError::TypeMismatch(name.to_string())),
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }

    fn file_mut(&mut self, path: &[String], name: &str) -> Result<&mut FileEntry, StorageError> {
        match self.dir_mut(path)?.children.get_mut(name) {
            Some(Node::File(entry)) => Ok(entry),
            Some(Node::Directory(_)) => Err(StorageError::TypeMismatch(name.to_string())),
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }

    fn release(&mut self, path: &[String], name: &str) {
        if let Ok(entry) = self.file_mut(path, name) {
            entry.locked = false;
        }
    }

    fn available(&self) -> Option<u64> {
        self.quota
            .map(|quota| quota.saturating_sub(usage(&self.root)))
    }
}

fn usage(dir: &DirEntry) -> u64 {
    dir.children
        .values()
        .map(|node| match node {
            Node::File(entry) => entry.data.len() as u64,
            Node::Directory(child) => usage(child),
        })
        .sum()
}

fn lock(state: &Mutex<HostState>) -> MutexGuard<'_, HostState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Debug)]
pub struct MemoryHost {
    state: Arc<Mutex<HostState>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState::new())),
        }
    }

    /// Host with the quota and availability from `config`
    pub fn from_config(config: &DraftConfig) -> Self {
        let mut host = Self::new();
        if let Some(quota) = config.quota_bytes {
            host = host.with_quota(quota);
        }
        if !config.storage_enabled {
            host = host.deny_root();
        }
        host
    }

    pub fn with_quota(self, bytes: u64) -> Self {
        lock(&self.state).quota = Some(bytes);
        self
    }

    /// Refuse to map a storage root, as a restricted browsing context does
    pub fn deny_root(self) -> Self {
        lock(&self.state).root_denied = true;
        self
    }

    /// Withhold read permission; no entry can be resolved without it
    pub fn deny_read(self) -> Self {
        lock(&self.state).read_allowed = false;
        self
    }

    pub fn deny_write(self) -> Self {
        lock(&self.state).write_allowed = false;
        self
    }

    /// Make the next call of `op` fail with `err`
    pub fn fail_next(&self, op: Operation, err: StorageError) {
        lock(&self.state)
            .faults
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Calls made so far, in order
    pub fn journal(&self) -> Vec<Operation> {
        lock(&self.state).journal.clone()
    }

    pub fn clear_journal(&self) {
        lock(&self.state).journal.clear();
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageHost for MemoryHost {
    type Root = MemoryDirectory;

    async fn get_directory(&self) -> Result<MemoryDirectory, StorageError> {
        let mut state = lock(&self.state);
        state.enter(Operation::GetDirectory)?;
        if state.root_denied {
            return Err(StorageError::Security(
                "storage is not available for this origin".into(),
            ));
        }
        Ok(MemoryDirectory {
            state: Arc::clone(&self.state),
            path: Vec::new(),
            name: String::new(),
        })
    }
}

#[derive(Debug)]
pub struct MemoryDirectory {
    state: Arc<Mutex<HostState>>,
    path: Vec<String>,
    name: String,
}

#[async_trait]
impl DirectoryHandle for MemoryDirectory {
    type File = MemoryFile;

    fn name(&self) -> &str {
        &self.name
    }

    async fn get_file_handle(
        &self,
        name: &str,
        options: GetHandleOptions,
    ) -> Result<MemoryFile, StorageError> {
        let mut state = lock(&self.state);
        state.enter(Operation::GetFileHandle)?;
        validate_entry_name(name)?;
        state.require_read()?;

        let existing = state.dir(&self.path)?.children.get(name).map(Node::is_file);
        match existing {
            Some(true) => {}
            Some(false) => return Err(StorageError::TypeMismatch(name.to_string())),
            None if options.create => {
                state.require_write()?;
                let entry = state.new_file();
                state
                    .dir_mut(&self.path)?
                    .children
                    .insert(name.to_string(), Node::File(entry));
                log::debug!("Created file entry {:?}", name);
            }
            None => return Err(StorageError::NotFound(name.to_string())),
        }

        Ok(MemoryFile {
            state: Arc::clone(&self.state),
            dir: self.path.clone(),
            name: name.to_string(),
        })
    }

    async fn get_directory_handle(
        &self,
        name: &str,
        options: GetHandleOptions,
    ) -> Result<MemoryDirectory, StorageError> {
        let mut state = lock(&self.state);
        state.enter(Operation::GetDirectoryHandle)?;
        validate_entry_name(name)?;
        state.require_read()?;

        let existing = state.dir(&self.path)?.children.get(name).map(Node::is_file);
        match existing {
            Some(false) => {}
            Some(true) => return Err(StorageError::TypeMismatch(name.to_string())),
            None if options.create => {
                state.require_write()?;
                state
                    .dir_mut(&self.path)?
                    .children
                    .insert(name.to_string(), Node::Directory(DirEntry::default()));
            }
            None => return Err(StorageError::NotFound(name.to_string())),
        }

        let mut path = self.path.clone();
        path.push(name.to_string());
        Ok(MemoryDirectory {
            state: Arc::clone(&self.state),
            path,
            name: name.to_string(),
        })
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        state.enter(Operation::RemoveEntry)?;
        validate_entry_name(name)?;
        state.require_write()?;

        let dir = state.dir_mut(&self.path)?;
        match dir.children.get(name) {
            None => return Err(StorageError::NotFound(name.to_string())),
            Some(Node::File(entry)) if entry.locked => {
                return Err(StorageError::NoModificationAllowed(format!(
                    "{name} is locked by a writer"
                )))
            }
            Some(Node::Directory(child)) if !recursive && !child.children.is_empty() => {
                return Err(StorageError::InvalidArgument(format!(
                    "directory {name} is not empty"
                )))
            }
            Some(_) => {}
        }
        dir.children.remove(name);
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryFile {
    state: Arc<Mutex<HostState>>,
    dir: Vec<String>,
    name: String,
}

#[async_trait]
impl FileHandle for MemoryFile {
    type Writable = MemoryWritable;
    type Snapshot = MemorySnapshot;

    fn name(&self) -> &str {
        &self.name
    }

    async fn create_writable(&self) -> Result<MemoryWritable, StorageError> {
        let mut state = lock(&self.state);
        state.enter(Operation::CreateWritable)?;
        state.require_write()?;

        let entry = state.file_mut(&self.dir, &self.name)?;
        if entry.locked {
            return Err(StorageError::NoModificationAllowed(format!(
                "{} already has an open writer",
                self.name
            )));
        }
        entry.locked = true;

        Ok(MemoryWritable {
            state: Arc::clone(&self.state),
            dir: self.dir.clone(),
            name: self.name.clone(),
            scratch: ScratchBuffer::new(entry.data.len() as u64),
            open: true,
            errored: false,
        })
    }

    async fn get_file(&self) -> Result<MemorySnapshot, StorageError> {
        let mut state = lock(&self.state);
        state.enter(Operation::GetFile)?;
        state.require_read()?;

        let entry = state.file(&self.dir, &self.name)?;
        Ok(MemorySnapshot {
            state: Arc::clone(&self.state),
            dir: self.dir.clone(),
            name: self.name.clone(),
            size: entry.data.len() as u64,
            modified: entry.modified,
            version: entry.version,
        })
    }
}

/// Writer holding the exclusive lock on one entry until closed or dropped
#[derive(Debug)]
pub struct MemoryWritable {
    state: Arc<Mutex<HostState>>,
    dir: Vec<String>,
    name: String,
    scratch: ScratchBuffer,
    open: bool,
    errored: bool,
}

#[async_trait]
impl WritableFileStream for MemoryWritable {
    async fn write(&mut self, command: WriteCommand) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        if !self.open {
            return Err(StorageError::CloseFailed("stream is closed".into()));
        }
        if self.errored {
            return Err(StorageError::Aborted(
                "stream was errored by a failed write".into(),
            ));
        }

        let result = state
            .enter(Operation::Write)
            .and_then(|_| state.require_write())
            .and_then(|_| state.file(&self.dir, &self.name).map(|_| ()))
            .and_then(|_| self.scratch.apply(command, state.available()));
        if result.is_err() {
            self.errored = true;
        }
        result
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        state.enter(Operation::Close)?;
        if !self.open {
            return Err(StorageError::CloseFailed("stream is already closed".into()));
        }
        self.open = false;

        if self.errored {
            state.release(&self.dir, &self.name);
            return Err(StorageError::CloseFailed(
                "stream was errored by a failed write".into(),
            ));
        }

        let version = state.bump_version();
        let entry = state.file_mut(&self.dir, &self.name)?;
        entry.data = self.scratch.data().to_vec();
        entry.version = version;
        entry.modified = Utc::now();
        entry.locked = false;
        Ok(())
    }
}

impl Drop for MemoryWritable {
    fn drop(&mut self) {
        if self.open {
            lock(&self.state).release(&self.dir, &self.name);
        }
    }
}

/// Entry state captured by [`MemoryFile::get_file`]
#[derive(Debug)]
pub struct MemorySnapshot {
    state: Arc<Mutex<HostState>>,
    dir: Vec<String>,
    name: String,
    size: u64,
    modified: DateTime<Utc>,
    version: u64,
}

#[async_trait]
impl FileSnapshot for MemorySnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.modified
    }

    async fn bytes(&self) -> Result<Vec<u8>, StorageError> {
        let mut state = lock(&self.state);
        state.enter(Operation::Read)?;
        state.require_read()?;

        let entry = state.file(&self.dir, &self.name)?;
        if entry.version != self.version {
            return Err(StorageError::NotReadable(format!(
                "{} changed after the reference was acquired",
                self.name
            )));
        }
        Ok(entry.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_denied_root_is_security_error() {
        let host = MemoryHost::new().deny_root();
        let err = host.get_directory().await.unwrap_err();
        assert!(matches!(err, StorageError::Security(_)));
        assert_eq!(host.journal(), vec![Operation::GetDirectory]);
    }

    #[tokio::test]
    async fn test_file_name_colliding_with_directory() {
        let host = MemoryHost::new();
        let root = host.get_directory().await.unwrap();
        root.get_directory_handle("draft.txt", GetHandleOptions::create())
            .await
            .unwrap();

        let err = root
            .get_file_handle("draft.txt", GetHandleOptions::create())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TypeMismatch(_)));
    }

    #[tokio::test]
    async fn test_missing_file_without_create() {
        let host = MemoryHost::new();
        let root = host.get_directory().await.unwrap();
        let err = root
            .get_file_handle("draft.txt", GetHandleOptions::existing())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_requires_write_permission() {
        let host = MemoryHost::new().deny_write();
        let root = host.get_directory().await.unwrap();
        let err = root
            .get_file_handle("draft.txt", GetHandleOptions::create())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotAllowed(_)));
    }

    #[tokio::test]
    async fn test_single_writer_lock() {
        let host = MemoryHost::new();
        let root = host.get_directory().await.unwrap();
        let file = root
            .get_file_handle("draft.txt", GetHandleOptions::create())
            .await
            .unwrap();

        let mut first = file.create_writable().await.unwrap();
        let err = file.create_writable().await.unwrap_err();
        assert!(matches!(err, StorageError::NoModificationAllowed(_)));

        let err = root.remove_entry("draft.txt", false).await.unwrap_err();
        assert!(matches!(err, StorageError::NoModificationAllowed(_)));

        first.close().await.unwrap();
        assert!(file.create_writable().await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_writer_releases_lock_without_commit() {
        let host = MemoryHost::new();
        let root = host.get_directory().await.unwrap();
        let file = root
            .get_file_handle("draft.txt", GetHandleOptions::create())
            .await
            .unwrap();

        {
            let mut writable = file.create_writable().await.unwrap();
            writable.write("lost".into()).await.unwrap();
        }

        let mut writable = file.create_writable().await.unwrap();
        writable.close().await.unwrap();
        let text = file.get_file().await.unwrap().text().await.unwrap();
        assert_eq!(text, "");
    }

    #[tokio::test]
    async fn test_failed_write_errors_the_stream() {
        let host = MemoryHost::new().with_quota(2);
        let root = host.get_directory().await.unwrap();
        let file = root
            .get_file_handle("draft.txt", GetHandleOptions::create())
            .await
            .unwrap();

        let mut writable = file.create_writable().await.unwrap();
        let err = writable.write("add".into()).await.unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));

        let err = writable.write("a".into()).await.unwrap_err();
        assert!(matches!(err, StorageError::Aborted(_)));

        let err = writable.close().await.unwrap_err();
        assert!(matches!(err, StorageError::CloseFailed(_)));

        // Lock is released even though the close was refused
        assert!(file.create_writable().await.is_ok());
    }

    #[tokio::test]
    async fn test_second_close_fails() {
        let host = MemoryHost::new();
        let root = host.get_directory().await.unwrap();
        let file = root
            .get_file_handle("draft.txt", GetHandleOptions::create())
            .await
            .unwrap();

        let mut writable = file.create_writable().await.unwrap();
        writable.close().await.unwrap();
        let err = writable.close().await.unwrap_err();
        assert!(matches!(err, StorageError::CloseFailed(_)));
        let err = writable.write("late".into()).await.unwrap_err();
        assert!(matches!(err, StorageError::CloseFailed(_)));
    }

    #[tokio::test]
    async fn test_remove_non_empty_directory_needs_recursive() {
        let host = MemoryHost::new();
        let root = host.get_directory().await.unwrap();
        let nested = root
            .get_directory_handle("notes", GetHandleOptions::create())
            .await
            .unwrap();
        nested
            .get_file_handle("draft.txt", GetHandleOptions::create())
            .await
            .unwrap();

        let err = root.remove_entry("notes", false).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
        root.remove_entry("notes", true).await.unwrap();

        let err = root
            .get_directory_handle("notes", GetHandleOptions::existing())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
