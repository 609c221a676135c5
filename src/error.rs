use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SubmitError {
    #[error("missing config file sra-submit.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("invalid source url: {0}")]
    InvalidSourceUrl(String),

    #[error("sequence {0} has no source urls")]
    MissingSource(String),

    #[error("{first} and {second} would both write {path}")]
    ConflictingUnits {
        path: String,
        first: String,
        second: String,
    },

    #[error("failed to read record set: {0}")]
    Records(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("archive extraction failed: {0}")]
    Archive(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("source returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("remote listing failed: {0}")]
    RemoteListing(String),

    #[error("malformed manifest {path}: {message}")]
    ManifestParse { path: String, message: String },

    #[error("submission document failed: {0}")]
    Document(String),

    #[error("timed out after {0} seconds waiting for report xml files")]
    ReportTimeout(u64),

    #[error("metadata update from report failed: {0}")]
    ReportUpdate(String),

    #[error("task {name} failed: {message}")]
    TaskFailed { name: String, message: String },
}
