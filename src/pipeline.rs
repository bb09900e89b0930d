//! Draft workflow
//!
//! Acquire the storage root, open-or-create the draft, write it through a
//! writable stream, then resolve it again and read it back. Every failure ends
//! the run except a failed close of the stream: it is logged and dropped, since
//! the only recovery left at that point is reloading the whole session.

use serde::Serialize;

use crate::error::{PipelineError, Stage, StorageError};
use crate::reporter::Reporter;
use crate::storage::{
    DirectoryHandle, FileHandle, FileSnapshot, GetHandleOptions, StorageHost, WritableFileStream,
    WriteCommand,
};

pub const DRAFT_FILE_NAME: &str = "draft.txt";
pub const DRAFT_PAYLOAD: &str = "add";

/// Result of a writer session whose write succeeded
#[derive(Debug)]
pub struct WriteReport {
    /// Bytes the close made durable; zero when the close failed
    pub bytes_committed: u64,
    /// Close failure that was suppressed
    pub close_error: Option<StorageError>,
}

/// Summary of one complete run
#[derive(Clone, Debug, Serialize)]
pub struct PipelineOutcome {
    pub file_name: String,
    pub bytes_committed: u64,
    pub suppressed_close_error: Option<String>,
    pub content: String,
}

pub async fn acquire_root<H: StorageHost>(host: &H) -> Result<H::Root, PipelineError> {
    log::debug!("Acquiring storage root");
    host.get_directory()
        .await
        .map_err(PipelineError::at(Stage::AcquireRoot))
}

/// Resolve `name` under `root`, creating it when missing
pub async fn resolve_file<D: DirectoryHandle>(
    root: &D,
    name: &str,
) -> Result<D::File, PipelineError> {
    log::debug!("Resolving {} for writing", name);
    root.get_file_handle(name, GetHandleOptions::create())
        .await
        .map_err(PipelineError::at(Stage::ResolveFile))
}

/// Write `payload` as the file's full content.
///
/// The write is awaited until it settles, then the stream is closed whatever
/// the write's outcome. A close failure is logged and reported in
/// [`WriteReport::close_error`]; a write failure is returned after the close
/// attempt.
pub async fn write_session<F: FileHandle>(
    file: &F,
    payload: &[u8],
) -> Result<WriteReport, PipelineError> {
    let mut writable = file
        .create_writable()
        .await
        .map_err(PipelineError::at(Stage::OpenWritable))?;

    let written = writable.write(WriteCommand::Data(payload.to_vec())).await;

    let close_error = match writable.close().await {
        Ok(()) => None,
        Err(err) => {
            log::warn!(
                "Ignoring failure to close {} ({}): {}",
                file.name(),
                err.kind().name(),
                err
            );
            Some(err)
        }
    };

    written.map_err(PipelineError::at(Stage::Write))?;
    let bytes_committed = match close_error {
        Some(_) => 0,
        None => payload.len() as u64,
    };
    log::debug!("Committed {} bytes to {}", bytes_committed, file.name());
    Ok(WriteReport {
        bytes_committed,
        close_error,
    })
}

/// Resolve `name` afresh and read its full content as text.
///
/// Must only run once any writer on the entry has settled. A snapshot taken
/// while a write is in flight reads as `NotReadable`; nothing here guards
/// against that.
pub async fn read_text<D: DirectoryHandle>(root: &D, name: &str) -> Result<String, PipelineError> {
    log::debug!("Resolving {} for reading", name);
    let file = root
        .get_file_handle(name, GetHandleOptions::existing())
        .await
        .map_err(PipelineError::at(Stage::ResolveSnapshot))?;
    let snapshot = file
        .get_file()
        .await
        .map_err(PipelineError::at(Stage::ResolveSnapshot))?;
    log::debug!(
        "Snapshot of {}: {} bytes, modified {}",
        snapshot.name(),
        snapshot.size(),
        snapshot.last_modified()
    );
    snapshot
        .text()
        .await
        .map_err(PipelineError::at(Stage::ReadText))
}

/// Run the whole workflow once against `host`
pub async fn run<H, R>(host: &H, reporter: &mut R) -> Result<PipelineOutcome, PipelineError>
where
    H: StorageHost,
    R: Reporter + ?Sized,
{
    let root = acquire_root(host).await?;

    let draft = resolve_file(&root, DRAFT_FILE_NAME).await?;
    let report = write_session(&draft, DRAFT_PAYLOAD.as_bytes()).await?;

    let content = read_text(&root, DRAFT_FILE_NAME).await?;
    reporter.report(&content);

    Ok(PipelineOutcome {
        file_name: DRAFT_FILE_NAME.to_string(),
        bytes_committed: report.bytes_committed,
        suppressed_close_error: report.close_error.map(|err| err.to_string()),
        content,
    })
}
