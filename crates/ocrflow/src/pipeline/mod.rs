pub mod config;
pub mod progress;
pub mod runner;

pub use config::{http_ocr_settings, PipelineConfig};
pub use progress::{ExtractionEvent, ProgressBroadcaster, ProgressTracker};
pub use runner::ExtractionPipeline;
