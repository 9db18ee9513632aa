use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::raster::{ColorMode, PageEncoding};
use crate::secrets::expand_home;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub ocr: OcrConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub raster: RasterConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextPredicateKind {
    #[default]
    Legible,
    NonEmpty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_wave_delay_ms")]
    pub wave_delay_ms: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub text_predicate: TextPredicateKind,
}

fn default_batch_size() -> usize {
    10
}

fn default_concurrency() -> usize {
    3
}

fn default_wave_delay_ms() -> u64 {
    1000
}

fn default_call_timeout_secs() -> u64 {
    120
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            wave_delay_ms: default_wave_delay_ms(),
            call_timeout_secs: default_call_timeout_secs(),
            text_predicate: TextPredicateKind::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterConfig {
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default = "default_color_mode")]
    pub color_mode: ColorMode,
    #[serde(default = "default_encoding")]
    pub encoding: PageEncoding,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: Option<u32>,
}

fn default_dpi() -> u32 {
    150
}

fn default_color_mode() -> ColorMode {
    ColorMode::Grayscale
}

fn default_encoding() -> PageEncoding {
    PageEncoding::Png
}

fn default_max_dimension() -> Option<u32> {
    Some(2000)
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            dpi: default_dpi(),
            color_mode: default_color_mode(),
            encoding: default_encoding(),
            max_dimension: default_max_dimension(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

impl StorageConfig {
    /// Source root with `~` expanded; the working directory when unset.
    pub fn source_root(&self) -> PathBuf {
        self.source_root
            .as_deref()
            .map(|p| PathBuf::from(expand_home(p)))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Configured database path with `~` expanded, else the default location.
    pub fn database_path(&self) -> Option<PathBuf> {
        match self.database_path.as_deref() {
            Some(p) => Some(PathBuf::from(expand_home(p))),
            None => crate::db::default_database_path(),
        }
    }
}
