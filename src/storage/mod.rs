//! Sandboxed storage layer
//!
//! - Capability traits for the host storage API
//! - Entry name validation
//! - In-memory and disk-backed hosts

mod file_system;
mod handle;
mod memory;
mod name;
mod scratch;

pub use file_system::{
    FileSystemDirectory, FileSystemFile, FileSystemHost, FileSystemSnapshot, FileSystemWritable,
};
pub use handle::{
    DirectoryHandle, FileHandle, FileSnapshot, GetHandleOptions, StorageHost, WritableFileStream,
    WriteCommand,
};
pub use memory::{
    MemoryDirectory, MemoryFile, MemoryHost, MemorySnapshot, MemoryWritable, Operation,
};
pub use name::validate_entry_name;
pub use scratch::MAX_ENTRY_SIZE;
