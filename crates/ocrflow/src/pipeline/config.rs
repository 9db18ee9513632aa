use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregate::{LegibleTextPredicate, NonEmptyPredicate, TextPredicate};
use crate::batch::DEFAULT_BATCH_SIZE;
use crate::config::{Config, OcrConfig, TextPredicateKind};
use crate::error::OcrServiceError;
use crate::ocr::{DispatchSettings, HttpOcrSettings};
use crate::raster::RasterOptions;
use crate::secrets::resolve_secret_optional;

pub struct PipelineConfig {
    pub batch_size: usize,
    pub dispatch: DispatchSettings,
    pub raster: RasterOptions,
    pub text_predicate: TextPredicateKind,
    pub source_root: PathBuf,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        let dispatch = &config.dispatch;
        Self {
            batch_size: dispatch.batch_size,
            dispatch: DispatchSettings {
                concurrency: dispatch.concurrency,
                wave_delay: Duration::from_millis(dispatch.wave_delay_ms),
                call_timeout: Duration::from_secs(dispatch.call_timeout_secs),
            },
            raster: RasterOptions {
                dpi: config.raster.dpi,
                color_mode: config.raster.color_mode,
                encoding: config.raster.encoding,
                max_dimension: config.raster.max_dimension,
            },
            text_predicate: dispatch.text_predicate,
            source_root: config.storage.source_root(),
        }
    }

    pub fn predicate(&self) -> Arc<dyn TextPredicate> {
        match self.text_predicate {
            TextPredicateKind::Legible => Arc::new(LegibleTextPredicate),
            TextPredicateKind::NonEmpty => Arc::new(NonEmptyPredicate),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            dispatch: DispatchSettings::default(),
            raster: RasterOptions::default(),
            text_predicate: TextPredicateKind::default(),
            source_root: PathBuf::from("."),
        }
    }
}

/// Builds HTTP client settings, resolving the API key from whichever source
/// is configured.
pub fn http_ocr_settings(ocr: &OcrConfig) -> Result<HttpOcrSettings, OcrServiceError> {
    let api_key = resolve_secret_optional(
        ocr.api_key.as_deref(),
        ocr.api_key_file.as_deref(),
        ocr.api_key_env_var.as_deref(),
    )?;

    let mut settings = HttpOcrSettings::new(ocr.endpoint.clone());
    settings.model = ocr.model.clone();
    if let Some(prompt) = ocr.prompt.as_ref().filter(|p| !p.trim().is_empty()) {
        settings.prompt = prompt.clone();
    }
    settings.api_key = api_key;
    settings.connect_timeout = Duration::from_secs(ocr.connect_timeout_secs);
    settings.request_timeout = Duration::from_secs(ocr.request_timeout_secs);
    Ok(settings)
}
