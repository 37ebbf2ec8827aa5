use std::path::PathBuf;

use thiserror::Error;

/// The fixed taxonomy of failures the export engine distinguishes.
///
/// Call sites that only need to propagate use `anyhow::Result` with `?` (the
/// crate's house style); call sites that need to branch on *kind* match on
/// these variants directly, e.g. the scheduler's fatal/non-fatal phase policy.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export folder does not exist: {0}")]
    ExportFolderDoesNotExist(PathBuf),

    #[error("export stopped")]
    ExportStopped,

    #[error("failed to update export record: {0}")]
    UpdateExportedRecordFailed(String),

    #[error("export record json parsing failed: {0}")]
    ExportRecordJsonParsingFailed(String),

    #[error("select folder aborted")]
    SelectFolderAborted,

    #[error("etag missing for {0}")]
    EtagMissing(String),

    #[error("upload cancelled")]
    UploadCancelled,

    #[error("collection {0} still has exported files")]
    CollectionNotEmpty(i64),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExportError {
    /// The three kinds that are always fatal to the current phase, per the
    /// phase error policy: everything else is logged, counted as `failed`,
    /// and the phase continues.
    pub fn is_fatal_to_phase(&self) -> bool {
        matches!(
            self,
            ExportError::ExportFolderDoesNotExist(_)
                | ExportError::ExportStopped
                | ExportError::UpdateExportedRecordFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;
