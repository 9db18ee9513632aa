use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("OCR service error: {0}")]
    OcrService(#[from] OcrServiceError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Rasterization failures. All of these are fatal for an attempt and are
/// raised before the attempt is marked processing.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Failed to process image: {0}")]
    ImageProcessing(String),

    #[error("Document has no pages")]
    NoPages,
}

#[derive(Error, Debug)]
pub enum OcrServiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid OCR service response: {0}")]
    InvalidResponse(String),

    #[error("Failed to resolve OCR credentials: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Local OCR failed: {0}")]
    Local(String),
}

/// Outcome of a single batch that did not yield text. Absorbed inline by the
/// aggregator; never aborts an attempt on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchFailure {
    #[error("service error: {0}")]
    Service(String),

    #[error("empty result")]
    EmptyResult,

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Attempt-level failures. Only these change an attempt's terminal status.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Document unreadable: {0}")]
    RasterizationFailed(#[from] ProcessError),

    #[error("OCR service failed for every batch ({total} of {total}): {summary}")]
    AllBatchesFailed { total: usize, summary: String },

    #[error("Extraction cancelled after {completed_waves} of {total_waves} waves")]
    CancellationRequested {
        completed_waves: usize,
        total_waves: usize,
    },

    #[error("Failed to record extraction result: {0}")]
    Aggregation(String),

    #[error("Extraction task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Job '{0}' not found")]
    NotFound(String),

    #[error("Job '{job_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: crate::job::JobStatus,
        to: crate::job::JobStatus,
    },

    #[error("Attempt {attempt} of job '{job_id}' was superseded by attempt {current}")]
    StaleAttempt {
        job_id: String,
        attempt: u32,
        current: u32,
    },

    #[error("Job '{job_id}' already has attempt {attempt} in flight")]
    AttemptInFlight { job_id: String, attempt: u32 },

    #[error("Job '{0}' already completed; request a re-extraction to run it again")]
    AlreadyCompleted(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, OcrflowError>;
