pub mod aggregate;
pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod logging;
pub mod ocr;
pub mod pipeline;
pub mod raster;
pub mod registry;
pub mod secrets;
pub mod source;

pub use aggregate::{Aggregate, Aggregator, LegibleTextPredicate, NonEmptyPredicate, TextPredicate};
pub use batch::{partition, Batch};
pub use config::{load_config, load_config_from_str, Config};
pub use db::Database;
pub use error::{
    BatchFailure, ConfigError, ExtractionError, OcrServiceError, OcrflowError, ProcessError,
    RegistryError, Result,
};
pub use job::{ExtractionJob, JobPhase, JobStatus, JobUpdate, RetryMode};
pub use ocr::{BatchResult, CancellationFlag, HttpOcrService, OcrRequest, OcrService};
pub use pipeline::{ExtractionEvent, ExtractionPipeline, PipelineConfig, ProgressBroadcaster};
pub use raster::{Page, RasterOptions, Rasterizer, RasterizerRegistry, SourceDocument};
pub use registry::{JobRegistry, RunLease};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use source::{DocumentSource, FsDocumentSource};
