use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GeoflatError {
    #[error("invalid GEO accession: {0}")]
    InvalidAccession(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("GEO request failed: {0}")]
    Transport(String),

    #[error("GEO returned status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("{0}")]
    #[diagnostic(help("the landing page layout may have changed; check the accession page in a browser"))]
    Resolution(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("malformed section [{section}] in {file}: {message}")]
    Parse {
        section: String,
        file: String,
        message: String,
    },

    #[error("required section [{0}] not found in any flat file")]
    MissingSection(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    #[error("another run holds the lock at {0}")]
    #[diagnostic(help("wait for the other run to finish, or remove the file if it is stale"))]
    Locked(PathBuf),

    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("stage {0} finished but its output is not complete")]
    StageIncomplete(String),

    #[error("stage {stage} cannot run before {predecessor} is complete")]
    PredecessorIncomplete { stage: String, predecessor: String },
}
