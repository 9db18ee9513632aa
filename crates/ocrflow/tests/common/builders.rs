//! Builder patterns for creating test configurations programmatically.

#![allow(dead_code)]

use std::time::Duration;

use ocrflow::config::schema::{
    Config, DispatchConfig, OcrConfig, RasterConfig, StorageConfig, TextPredicateKind,
};
use ocrflow::ocr::DispatchSettings;
use ocrflow::PipelineConfig;

/// Builder for creating `Config` instances.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with sensible defaults for testing.
    pub fn new() -> Self {
        Self {
            config: Config {
                version: "1.0".to_string(),
                ocr: OcrConfig {
                    endpoint: "http://127.0.0.1:9/ocr".to_string(),
                    model: None,
                    prompt: None,
                    api_key: None,
                    api_key_file: None,
                    api_key_env_var: None,
                    request_timeout_secs: 120,
                    connect_timeout_secs: 10,
                },
                dispatch: DispatchConfig::default(),
                raster: RasterConfig::default(),
                storage: StorageConfig::default(),
            },
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.config.version = version.to_string();
        self
    }

    pub fn endpoint(mut self, endpoint: &str) -> Self {
        self.config.ocr.endpoint = endpoint.to_string();
        self
    }

    pub fn api_key(mut self, key: &str) -> Self {
        self.config.ocr.api_key = Some(key.to_string());
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.dispatch.batch_size = size;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.dispatch.concurrency = concurrency;
        self
    }

    pub fn wave_delay_ms(mut self, delay: u64) -> Self {
        self.config.dispatch.wave_delay_ms = delay;
        self
    }

    pub fn text_predicate(mut self, predicate: TextPredicateKind) -> Self {
        self.config.dispatch.text_predicate = predicate;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.raster.dpi = dpi;
        self
    }

    pub fn source_root(mut self, root: &str) -> Self {
        self.config.storage.source_root = Some(root.to_string());
        self
    }

    pub fn database_path(mut self, path: &str) -> Self {
        self.config.storage.database_path = Some(path.to_string());
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Pipeline settings with the reference wave delay of one second.
pub fn pipeline_config(batch_size: usize, concurrency: usize) -> PipelineConfig {
    PipelineConfig {
        batch_size,
        dispatch: DispatchSettings {
            concurrency,
            wave_delay: Duration::from_secs(1),
            call_timeout: Duration::from_secs(120),
        },
        ..PipelineConfig::default()
    }
}

/// Same as [`pipeline_config`] with a custom per-call timeout.
pub fn pipeline_config_with_timeout(
    batch_size: usize,
    concurrency: usize,
    call_timeout: Duration,
) -> PipelineConfig {
    let mut config = pipeline_config(batch_size, concurrency);
    config.dispatch.call_timeout = call_timeout;
    config
}
