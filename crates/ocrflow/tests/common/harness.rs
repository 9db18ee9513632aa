//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` owns a temporary directory (source documents and an
//! optional SQLite file) and the job registry shared by every pipeline it
//! builds. The OCR service, document source and rasterizer are scripted so
//! tests control page counts, per-batch replies and timing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use ocrflow::error::{OcrServiceError, ProcessError};
use ocrflow::ocr::{OcrRequest, OcrService};
use ocrflow::raster::{
    DocumentFormat, Page, RasterOptions, RasterizedPages, Rasterizer, RasterizerRegistry,
    SourceDocument,
};
use ocrflow::source::{DocumentSource, FsDocumentSource};
use ocrflow::{Database, ExtractionPipeline, JobRegistry, PipelineConfig};

/// What the scripted service does for one batch.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    /// Fails with an HTTP-style service error.
    Fail { status: u16, message: String },
    /// Returns only whitespace.
    Empty,
    /// Never answers within any sane timeout.
    Hang,
}

/// Default text for a batch: names the batch and its pages.
pub fn batch_text(batch_index: usize, pages: &[usize]) -> String {
    let pages: Vec<String> = pages.iter().map(|p| (p + 1).to_string()).collect();
    format!("Batch {} text for pages {}", batch_index + 1, pages.join(","))
}

/// OCR stand-in. Batches without a scripted reply get [`batch_text`].
pub struct ScriptedOcrService {
    replies: Mutex<HashMap<usize, Reply>>,
    delays: Mutex<HashMap<usize, Duration>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedOcrService {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn reply(&self, batch_index: usize, reply: Reply) -> &Self {
        self.replies.lock().unwrap().insert(batch_index, reply);
        self
    }

    pub fn fail(&self, batch_index: usize, status: u16, message: &str) -> &Self {
        self.reply(
            batch_index,
            Reply::Fail {
                status,
                message: message.to_string(),
            },
        )
    }

    pub fn delay(&self, batch_index: usize, delay: Duration) -> &Self {
        self.delays.lock().unwrap().insert(batch_index, delay);
        self
    }

    /// Drops every scripted reply; all batches succeed again.
    pub fn reset_replies(&self) {
        self.replies.lock().unwrap().clear();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even when the call future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl OcrService for ScriptedOcrService {
    async fn recognize(&self, request: OcrRequest<'_>) -> Result<String, OcrServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(&request.batch_index)
            .copied()
            .unwrap_or(Duration::from_millis(10));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&request.batch_index)
            .cloned();

        tokio::time::sleep(delay).await;

        match reply {
            None => {
                let pages: Vec<usize> = request.pages.iter().map(|p| p.index).collect();
                Ok(batch_text(request.batch_index, &pages))
            }
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail { status, message }) => Err(OcrServiceError::Api { status, message }),
            Some(Reply::Empty) => Ok("  \n".to_string()),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                Ok(String::new())
            }
        }
    }
}

/// Serves the same placeholder bytes for every reference. Yields once first,
/// like a real fetch, so tasks joined with a run get polled mid-fetch.
pub struct StaticSource;

#[async_trait]
impl DocumentSource for StaticSource {
    async fn fetch(&self, source_ref: &str) -> Result<SourceDocument, ProcessError> {
        tokio::task::yield_now().await;
        Ok(SourceDocument::new(source_ref, b"%PDF-1.4\n".to_vec()))
    }
}

/// Rasterizes any PDF into a fixed number of one-pixel pages.
pub struct FixedRasterizer {
    pub pages: usize,
}

impl Rasterizer for FixedRasterizer {
    fn rasterize(
        &self,
        _document: SourceDocument,
        options: &RasterOptions,
    ) -> Result<RasterizedPages, ProcessError> {
        let encoding = options.encoding;
        Ok(RasterizedPages::new(
            self.pages,
            (0..self.pages).map(move |index| {
                Ok(Page {
                    index,
                    data: vec![0],
                    encoding,
                    width: 1,
                    height: 1,
                })
            }),
        ))
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        format == DocumentFormat::Pdf
    }
}

/// Test harness providing an isolated registry and source directory.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Root of the filesystem document source.
    pub source_dir: PathBuf,
    /// SQLite file, when the harness was created with a database.
    pub db_path: Option<PathBuf>,
    pub registry: Arc<JobRegistry>,
}

impl TestHarness {
    /// Harness with an in-memory registry.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source_dir = temp_dir.path().join("sources");
        std::fs::create_dir_all(&source_dir).expect("Failed to create source dir");

        Self {
            temp_dir,
            source_dir,
            db_path: None,
            registry: Arc::new(JobRegistry::in_memory()),
        }
    }

    /// Harness whose registry writes through to a SQLite file.
    pub fn with_database() -> Self {
        let mut harness = Self::new();
        let db_path = harness.temp_dir.path().join("data").join("ocrflow.db");
        let db = Database::open(&db_path).expect("Failed to open database");
        harness.registry = Arc::new(JobRegistry::with_database(db));
        harness.db_path = Some(db_path);
        harness
    }

    /// A fresh registry over the same database file, with an empty cache.
    pub fn reopen_registry(&self) -> JobRegistry {
        let path = self.db_path.as_ref().expect("Harness has no database");
        JobRegistry::with_database(Database::open(path).expect("Failed to reopen database"))
    }

    /// Writes a source document and returns its reference.
    pub fn write_source(&self, name: &str, content: &[u8]) -> String {
        let path = self.source_dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create source subdir");
        }
        std::fs::write(&path, content).expect("Failed to write source file");
        name.to_string()
    }

    /// Pipeline over a scripted source that always yields `pages` pages.
    pub fn pipeline(
        &self,
        config: PipelineConfig,
        pages: usize,
        ocr: Arc<ScriptedOcrService>,
    ) -> ExtractionPipeline {
        ExtractionPipeline::new(
            Arc::new(config),
            Arc::clone(&self.registry),
            Arc::new(StaticSource),
            RasterizerRegistry::with_rasterizers(vec![Box::new(FixedRasterizer { pages })]),
            ocr,
        )
    }

    /// Pipeline over the harness's source directory with the real rasterizers.
    pub fn fs_pipeline(
        &self,
        config: PipelineConfig,
        ocr: Arc<ScriptedOcrService>,
    ) -> ExtractionPipeline {
        ExtractionPipeline::new(
            Arc::new(config),
            Arc::clone(&self.registry),
            Arc::new(FsDocumentSource::new(&self.source_dir)),
            RasterizerRegistry::new(),
            ocr,
        )
    }
}
