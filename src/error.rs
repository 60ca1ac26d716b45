use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BgdError {
    #[error("malformed assembly accession: {0}")]
    #[diagnostic(help("expected <PREFIX>_<DIGITS>.<VERSION>, e.g. GCA_003841505.1"))]
    MalformedIdentifier(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("download returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("expected file not found in {archive}: {pattern}")]
    FileNotFoundInArchive { archive: String, pattern: String },

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("cannot read organism from FASTA header of {file}: {reason}")]
    HeaderParseFailed { file: String, reason: String },

    #[error("output directory already populated: {0}")]
    #[diagnostic(help("pass --on-existing wipe or --on-existing skip to reuse it"))]
    OutputConflict(PathBuf),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("invalid include value: {0}")]
    InvalidInclude(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl BgdError {
    /// Short stage tag used in ledger entries and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            BgdError::MalformedIdentifier(_) => "malformed-identifier",
            BgdError::InvalidInput(_) => "invalid-input",
            BgdError::DownloadFailed(_) | BgdError::DownloadStatus { .. } => "download-failed",
            BgdError::FileNotFoundInArchive { .. } => "file-not-found",
            BgdError::ExtractionFailed(_) => "extraction-failed",
            BgdError::HeaderParseFailed { .. } => "header-parse-failed",
            BgdError::OutputConflict(_) => "output-conflict",
            BgdError::MissingTool(_) => "missing-tool",
            BgdError::InvalidInclude(_) => "invalid-include",
            BgdError::ConfigRead(_) | BgdError::ConfigParse(_) => "config",
            BgdError::Filesystem(_) => "filesystem",
        }
    }
}
