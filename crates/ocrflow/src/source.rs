//! Where documents come from.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::ProcessError;
use crate::raster::SourceDocument;

/// Resolves a document reference to its bytes.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, source_ref: &str) -> Result<SourceDocument, ProcessError>;
}

/// Reads documents from a directory. References are relative paths and may
/// not leave the root.
#[derive(Debug, Clone)]
pub struct FsDocumentSource {
    root: PathBuf,
}

impl FsDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, source_ref: &str) -> Result<PathBuf, ProcessError> {
        let relative = Path::new(source_ref);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if source_ref.trim().is_empty() || escapes {
            return Err(ProcessError::ReadDocument {
                path: relative.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "document reference must be a relative path inside the source root",
                ),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn fetch(&self, source_ref: &str) -> Result<SourceDocument, ProcessError> {
        let path = self.resolve(source_ref)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ProcessError::ReadDocument {
                path: path.clone(),
                source: e,
            })?;

        log::debug!("Fetched {} ({} bytes)", path.display(), bytes.len());
        Ok(SourceDocument::new(source_ref, bytes))
    }
}
