//! Shared test utilities for ocrflow integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs with a temp directory and job registry
//! - `ScriptedOcrService`, a scripted stand-in for the remote OCR service
//! - Builders for configs and pipeline settings

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
