//! draft-store: write-close-read against a sandboxed per-origin file store
//!
//! The workflow resolves `draft.txt` under an origin's storage root, replaces its
//! content through a writable stream, and reads it back through a fresh handle.
//!
//! # Architecture
//!
//! - **Storage**: capability traits for the host storage API, with a disk-backed
//!   host and an in-memory host
//! - **Pipeline**: the staged workflow and its error policy (every failure is
//!   fatal except closing the stream)
//! - **Reporter**: where the content read back is printed
//!
//! # Example
//!
//! ```no_run
//! use draft_store::{run, ConsoleReporter, FileSystemHost};
//!
//! # async fn demo() -> draft_store::Result<()> {
//! let host = FileSystemHost::new("./opfs", "http://localhost");
//! let outcome = run(&host, &mut ConsoleReporter).await?;
//! assert_eq!(outcome.content, "add");
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod config;
pub mod error;
pub mod pipeline;
pub mod reporter;
pub mod storage;

// Re-exports for convenience
pub use config::{Backend, DraftConfig};
pub use error::{ErrorKind, PipelineError, Stage, StorageError};
pub use pipeline::{
    acquire_root, read_text, resolve_file, run, write_session, PipelineOutcome, WriteReport,
    DRAFT_FILE_NAME, DRAFT_PAYLOAD,
};
pub use reporter::{ConsoleReporter, MemoryReporter, Reporter};
pub use storage::{FileSystemHost, MemoryHost};

// Common result type
pub type Result<T> = std::result::Result<T, PipelineError>;
