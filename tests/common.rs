//! Common test utilities for draft workflow integration tests
//!
//! This module provides shared test infrastructure including:
//! - Logger setup
//! - Disk sandboxes in temporary directories
//! - Helpers for seeding and reading entries through the storage API

#![allow(dead_code)]

use std::path::PathBuf;

use draft_store::storage::{
    DirectoryHandle, FileHandle, FileSnapshot, GetHandleOptions, StorageHost, WritableFileStream,
};
use draft_store::{FileSystemHost, StorageError};
use tempfile::TempDir;

pub const TEST_ORIGIN: &str = "https://drafts.test";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Disk host rooted in a temporary directory that is removed on drop
pub struct TestSandbox {
    pub temp_dir: TempDir,
    pub host: FileSystemHost,
}

impl TestSandbox {
    pub fn new() -> anyhow::Result<Self> {
        init_logger();
        let temp_dir = TempDir::new()?;
        log::info!("📁 Test directory: {:?}", temp_dir.path());
        let host = FileSystemHost::new(temp_dir.path(), TEST_ORIGIN);
        Ok(Self { temp_dir, host })
    }

    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.host = self.host.with_quota(bytes);
        self
    }

    /// Path of `name` inside the origin's sandbox
    pub fn entry_path(&self, name: &str) -> PathBuf {
        self.host.sandbox_dir().join(name)
    }

    /// Create the sandbox directory ahead of the first run
    pub fn prepare(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(self.host.sandbox_dir())?;
        Ok(())
    }
}

/// Replace the content of `name` through a writer session
pub async fn seed<H: StorageHost>(host: &H, name: &str, content: &str) -> Result<(), StorageError> {
    let root = host.get_directory().await?;
    let file = root.get_file_handle(name, GetHandleOptions::create()).await?;
    let mut writable = file.create_writable().await?;
    writable.write(content.into()).await?;
    writable.close().await
}

/// Read `name` through a fresh handle
pub async fn read_back<H: StorageHost>(host: &H, name: &str) -> Result<String, StorageError> {
    let root = host.get_directory().await?;
    let file = root.get_file_handle(name, GetHandleOptions::existing()).await?;
    file.get_file().await?.text().await
}
