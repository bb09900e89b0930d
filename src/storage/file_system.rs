use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use super::handle::{
    DirectoryHandle, FileHandle, FileSnapshot, GetHandleOptions, StorageHost, WritableFileStream,
    WriteCommand,
};
use super::name::validate_entry_name;
use super::scratch::ScratchBuffer;
use crate::config::DraftConfig;
use crate::error::StorageError;

/// Suffix of the swap file that holds a writer's pending content and its lock
const SWAP_SUFFIX: &str = ".crswap";

/// Disk-backed storage host
///
/// Each origin gets its own sandbox directory under `base_dir`. A writer owns
/// `<name>.crswap` next to its target until it closes; the swap file is renamed
/// over the target on close.
///
/// Writer locks live in the host value and its clones, not on disk. Swap files
/// left behind by a host that went away without closing its writers are
/// removed the next time a host maps the sandbox.
#[derive(Clone, Debug)]
pub struct FileSystemHost {
    base_dir: PathBuf,
    origin: String,
    quota: Option<u64>,
    enabled: bool,
    writers: WriterLocks,
}

impl FileSystemHost {
    pub fn new(base_dir: impl Into<PathBuf>, origin: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            origin: origin.into(),
            quota: None,
            enabled: true,
            writers: WriterLocks::default(),
        }
    }

    pub fn from_config(config: &DraftConfig) -> Self {
        let mut host = Self::new(config.storage_dir.clone(), config.origin.clone());
        host.quota = config.quota_bytes;
        host.enabled = config.storage_enabled;
        host
    }

    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota = Some(bytes);
        self
    }

    /// Refuse to map a storage root for any origin
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Directory holding this origin's files
    pub fn sandbox_dir(&self) -> PathBuf {
        self.base_dir.join(origin_dir_name(&self.origin))
    }
}

/// Map an origin such as `https://example.com:8443` to a single directory name
///
/// Bytes other than ASCII alphanumerics, `-` and `.` are written as `_XX`, so
/// distinct origins never share a directory.
fn origin_dir_name(origin: &str) -> String {
    let mut name = String::with_capacity(origin.len());
    for byte in origin.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("_{byte:02X}"));
        }
    }
    name
}

fn swap_path(target: &Path) -> PathBuf {
    let mut swap = target.as_os_str().to_owned();
    swap.push(SWAP_SUFFIX);
    PathBuf::from(swap)
}

fn is_swap(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == &SWAP_SUFFIX[1..])
}

fn validate_disk_name(name: &str) -> Result<(), StorageError> {
    validate_entry_name(name)?;
    if name.ends_with(SWAP_SUFFIX) {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

async fn discard_swap(swap: &Path) {
    if let Err(err) = fs::remove_file(swap).await {
        log::warn!("Failed to remove swap file {}: {}", swap.display(), err);
    }
}

/// Swap files held by the live writers of one host
#[derive(Clone, Debug, Default)]
struct WriterLocks(Arc<Mutex<HashSet<PathBuf>>>);

impl WriterLocks {
    fn held(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// False when a writer of this host already holds `swap`
    fn acquire(&self, swap: &Path) -> bool {
        self.held().insert(swap.to_path_buf())
    }

    fn release(&self, swap: &Path) {
        self.held().remove(swap);
    }

    fn is_held(&self, swap: &Path) -> bool {
        self.held().contains(swap)
    }
}

/// Limits and locks shared by every handle under one sandbox
#[derive(Debug)]
struct Sandbox {
    root: PathBuf,
    quota: Option<u64>,
    writers: WriterLocks,
}

impl Sandbox {
    /// Bytes committed under the sandbox, swap files excluded
    async fn usage(&self) -> Result<u64, StorageError> {
        let mut total = 0;
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                let path = entry.path();
                if meta.is_dir() {
                    pending.push(path);
                } else if !is_swap(&path) {
                    total += meta.len();
                }
            }
        }
        Ok(total)
    }

    async fn available(&self) -> Result<Option<u64>, StorageError> {
        match self.quota {
            Some(quota) => Ok(Some(quota.saturating_sub(self.usage().await?))),
            None => Ok(None),
        }
    }

    /// Remove swap files that no live writer of this host owns
    async fn clear_orphaned_swaps(&self) -> Result<(), StorageError> {
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if is_swap(&path) && !self.writers.is_held(&path) {
                    log::info!("Clearing orphaned swap file {}", path.display());
                    discard_swap(&path).await;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageHost for FileSystemHost {
    type Root = FileSystemDirectory;

    async fn get_directory(&self) -> Result<FileSystemDirectory, StorageError> {
        if !self.enabled {
            return Err(StorageError::Security(format!(
                "storage is disabled for origin {}",
                self.origin
            )));
        }
        let dir_name = origin_dir_name(&self.origin);
        if validate_entry_name(&dir_name).is_err() {
            return Err(StorageError::Security(format!(
                "origin {:?} cannot be mapped to a storage area",
                self.origin
            )));
        }

        let root = self.base_dir.join(&dir_name);
        let denied = |err: std::io::Error| match err.kind() {
            std::io::ErrorKind::PermissionDenied => StorageError::Security(format!(
                "cannot map storage area {}: {}",
                root.display(),
                err
            )),
            _ => StorageError::Io(err),
        };
        match fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(StorageError::Security(format!(
                    "storage area {} is not a directory",
                    root.display()
                )))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(&root).await.map_err(denied)?;
                log::info!(
                    "Created storage sandbox for {} at {}",
                    self.origin,
                    root.display()
                );
            }
            Err(err) => return Err(denied(err)),
        }

        let sandbox = Sandbox {
            root: root.clone(),
            quota: self.quota,
            writers: self.writers.clone(),
        };
        sandbox.clear_orphaned_swaps().await?;

        Ok(FileSystemDirectory {
            sandbox: Arc::new(sandbox),
            path: root,
            name: String::new(),
        })
    }
}

#[derive(Debug)]
pub struct FileSystemDirectory {
    sandbox: Arc<Sandbox>,
    path: PathBuf,
    name: String,
}

#[async_trait]
impl DirectoryHandle for FileSystemDirectory {
    type File = FileSystemFile;

    fn name(&self) -> &str {
        &self.name
    }

    async fn get_file_handle(
        &self,
        name: &str,
        options: GetHandleOptions,
    ) -> Result<FileSystemFile, StorageError> {
        validate_disk_name(name)?;
        let path = self.path.join(name);

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => return Err(StorageError::TypeMismatch(name.to_string())),
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && options.create => {
                fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .open(&path)
                    .await
                    .map_err(|err| StorageError::from_io(err, name))?;
                log::debug!("Created file {}", path.display());
            }
            Err(err) => return Err(StorageError::from_io(err, name)),
        }

        Ok(FileSystemFile {
            sandbox: Arc::clone(&self.sandbox),
            path,
            name: name.to_string(),
        })
    }

    async fn get_directory_handle(
        &self,
        name: &str,
        options: GetHandleOptions,
    ) -> Result<FileSystemDirectory, StorageError> {
        validate_disk_name(name)?;
        let path = self.path.join(name);

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(StorageError::TypeMismatch(name.to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && options.create => {
                fs::create_dir(&path)
                    .await
                    .map_err(|err| StorageError::from_io(err, name))?;
            }
            Err(err) => return Err(StorageError::from_io(err, name)),
        }

        Ok(FileSystemDirectory {
            sandbox: Arc::clone(&self.sandbox),
            path,
            name: name.to_string(),
        })
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> Result<(), StorageError> {
        validate_disk_name(name)?;
        let path = self.path.join(name);
        let meta = fs::metadata(&path)
            .await
            .map_err(|err| StorageError::from_io(err, name))?;

        if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&path).await?;
                return Ok(());
            }
            let mut entries = fs::read_dir(&path).await?;
            if entries.next_entry().await?.is_some() {
                return Err(StorageError::InvalidArgument(format!(
                    "directory {name} is not empty"
                )));
            }
            fs::remove_dir(&path)
                .await
                .map_err(|err| StorageError::from_io(err, name))?;
            return Ok(());
        }

        if fs::try_exists(swap_path(&path)).await? {
            return Err(StorageError::NoModificationAllowed(format!(
                "{name} is locked by a writer"
            )));
        }
        fs::remove_file(&path)
            .await
            .map_err(|err| StorageError::from_io(err, name))
    }
}

#[derive(Debug)]
pub struct FileSystemFile {
    sandbox: Arc<Sandbox>,
    path: PathBuf,
    name: String,
}

impl FileSystemFile {
    async fn metadata(&self) -> Result<std::fs::Metadata, StorageError> {
        let meta = fs::metadata(&self.path)
            .await
            .map_err(|err| StorageError::from_io(err, &self.name))?;
        if meta.is_dir() {
            return Err(StorageError::TypeMismatch(self.name.clone()));
        }
        Ok(meta)
    }
}

#[async_trait]
impl FileHandle for FileSystemFile {
    type Writable = FileSystemWritable;
    type Snapshot = FileSystemSnapshot;

    fn name(&self) -> &str {
        &self.name
    }

    async fn create_writable(&self) -> Result<FileSystemWritable, StorageError> {
        let meta = self.metadata().await?;
        let swap = swap_path(&self.path);
        let locked = || {
            StorageError::NoModificationAllowed(format!(
                "{} already has an open writer",
                self.name
            ))
        };

        if !self.sandbox.writers.acquire(&swap) {
            return Err(locked());
        }
        // A swap file present here belongs to a writer of another host
        let created = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&swap)
            .await;
        if let Err(err) = created {
            self.sandbox.writers.release(&swap);
            return Err(match err.kind() {
                std::io::ErrorKind::AlreadyExists => locked(),
                _ => StorageError::from_io(err, &self.name),
            });
        }
        log::debug!("Acquired writer lock {}", swap.display());

        Ok(FileSystemWritable {
            sandbox: Arc::clone(&self.sandbox),
            target: self.path.clone(),
            swap: Some(swap),
            name: self.name.clone(),
            scratch: ScratchBuffer::new(meta.len()),
            errored: false,
        })
    }

    async fn get_file(&self) -> Result<FileSystemSnapshot, StorageError> {
        let meta = self.metadata().await?;
        Ok(FileSystemSnapshot {
            path: self.path.clone(),
            name: self.name.clone(),
            size: meta.len(),
            modified: meta.modified()?,
        })
    }
}

/// Writer owning a swap file; `swap` is `None` once closed
#[derive(Debug)]
pub struct FileSystemWritable {
    sandbox: Arc<Sandbox>,
    target: PathBuf,
    swap: Option<PathBuf>,
    name: String,
    scratch: ScratchBuffer,
    errored: bool,
}

impl FileSystemWritable {
    async fn apply(&mut self, command: WriteCommand) -> Result<(), StorageError> {
        fs::metadata(&self.target)
            .await
            .map_err(|err| StorageError::from_io(err, &self.name))?;

        let available = self.sandbox.available().await?;
        self.scratch.apply(command, available)?;

        if let Some(swap) = &self.swap {
            fs::write(swap, self.scratch.data())
                .await
                .map_err(|err| StorageError::from_io(err, &self.name))?;
        }
        Ok(())
    }

    /// Rename the swap file over the target, or discard it
    async fn commit(&self, swap: &Path) -> Result<(), StorageError> {
        if self.errored {
            discard_swap(swap).await;
            return Err(StorageError::CloseFailed(
                "stream was errored by a failed write".into(),
            ));
        }
        if let Err(err) = fs::metadata(&self.target).await {
            discard_swap(swap).await;
            return Err(StorageError::from_io(err, &self.name));
        }
        if let Err(err) = fs::rename(swap, &self.target).await {
            discard_swap(swap).await;
            return Err(StorageError::from_io(err, &self.name));
        }
        log::debug!(
            "Committed {} bytes to {}",
            self.scratch.data().len(),
            self.target.display()
        );
        Ok(())
    }
}

#[async_trait]
impl WritableFileStream for FileSystemWritable {
    async fn write(&mut self, command: WriteCommand) -> Result<(), StorageError> {
        if self.swap.is_none() {
            return Err(StorageError::CloseFailed("stream is closed".into()));
        }
        if self.errored {
            return Err(StorageError::Aborted(
                "stream was errored by a failed write".into(),
            ));
        }

        let result = self.apply(command).await;
        if result.is_err() {
            self.errored = true;
        }
        result
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        let Some(swap) = self.swap.take() else {
            return Err(StorageError::CloseFailed("stream is already closed".into()));
        };

        let committed = self.commit(&swap).await;
        self.sandbox.writers.release(&swap);
        committed
    }
}

impl Drop for FileSystemWritable {
    fn drop(&mut self) {
        // Drop cannot await, so the swap file is unlinked with a blocking call.
        // If that fails the file is cleared the next time the sandbox is mapped.
        if let Some(swap) = self.swap.take() {
            if let Err(err) = std::fs::remove_file(&swap) {
                log::warn!("Failed to remove swap file {}: {}", swap.display(), err);
            }
            self.sandbox.writers.release(&swap);
        }
    }
}

/// Entry state captured by [`FileSystemFile::get_file`]
#[derive(Debug)]
pub struct FileSystemSnapshot {
    path: PathBuf,
    name: String,
    size: u64,
    modified: SystemTime,
}

#[async_trait]
impl FileSnapshot for FileSystemSnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn last_modified(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.modified)
    }

    async fn bytes(&self) -> Result<Vec<u8>, StorageError> {
        let meta = fs::metadata(&self.path)
            .await
            .map_err(|err| StorageError::from_io(err, &self.name))?;
        if meta.len() != self.size || meta.modified()? != self.modified {
            return Err(StorageError::NotReadable(format!(
                "{} changed after the reference was acquired",
                self.name
            )));
        }
        fs::read(&self.path)
            .await
            .map_err(|err| StorageError::from_io(err, &self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_dir_name() {
        assert_eq!(origin_dir_name("http://localhost"), "http_3A_2F_2Flocalhost");
        assert_eq!(
            origin_dir_name("https://example.com:8443"),
            "https_3A_2F_2Fexample.com_3A8443"
        );
    }

    #[test]
    fn test_origin_dir_names_do_not_collide() {
        assert_ne!(origin_dir_name("http://a_b"), origin_dir_name("http://a/b"));
        assert_ne!(origin_dir_name("http://a_b"), origin_dir_name("http://a:b"));
        assert_eq!(origin_dir_name("http://a_b"), "http_3A_2F_2Fa_5Fb");
    }

    #[test]
    fn test_writer_locks() {
        let locks = WriterLocks::default();
        let swap = Path::new("/tmp/sandbox/draft.txt.crswap");
        assert!(locks.acquire(swap));
        assert!(!locks.clone().acquire(swap));
        assert!(locks.is_held(swap));
        locks.release(swap);
        assert!(!locks.is_held(swap));
        assert!(locks.acquire(swap));
    }

    #[test]
    fn test_swap_path() {
        let swap = swap_path(Path::new("/tmp/sandbox/draft.txt"));
        assert_eq!(swap, PathBuf::from("/tmp/sandbox/draft.txt.crswap"));
        assert!(is_swap(&swap));
        assert!(!is_swap(Path::new("/tmp/sandbox/draft.txt")));
    }

    #[test]
    fn test_swap_names_are_reserved() {
        assert!(validate_disk_name("draft.txt").is_ok());
        assert!(matches!(
            validate_disk_name("draft.txt.crswap"),
            Err(StorageError::InvalidName(_))
        ));
    }
}
