//! Local OCR through Tesseract, for offline use.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::OcrServiceError;
use crate::ocr::{OcrRequest, OcrService};

#[derive(Clone)]
pub struct TesseractOcrService {
    languages: Arc<str>,
}

impl TesseractOcrService {
    pub fn new(languages: &[String]) -> Self {
        let lang_str = if languages.is_empty() {
            "eng".to_string()
        } else {
            languages.join("+")
        };
        Self {
            languages: lang_str.into(),
        }
    }

    pub fn languages(&self) -> &str {
        &self.languages
    }

    fn recognize_page(languages: &str, image_data: &[u8]) -> Result<String, OcrServiceError> {
        let _span = tracing::info_span!("ocr.tesseract").entered();

        let mut lt = leptess::LepTess::new(None, languages).map_err(|e| {
            OcrServiceError::Local(format!("Failed to initialize Tesseract: {}", e))
        })?;

        lt.set_image_from_mem(image_data)
            .map_err(|e| OcrServiceError::Local(format!("Failed to set image for OCR: {}", e)))?;

        lt.get_utf8_text()
            .map_err(|e| OcrServiceError::Local(format!("OCR failed: {}", e)))
    }
}

#[async_trait]
impl OcrService for TesseractOcrService {
    async fn recognize(&self, request: OcrRequest<'_>) -> Result<String, OcrServiceError> {
        let languages = Arc::clone(&self.languages);
        let pages: Vec<Vec<u8>> = request.pages.iter().map(|p| p.data.clone()).collect();

        // Tesseract is CPU-bound and synchronous.
        tokio::task::spawn_blocking(move || {
            pages
                .iter()
                .map(|data| Self::recognize_page(&languages, data))
                .collect::<Result<Vec<_>, _>>()
                .map(|texts| texts.join("\n"))
        })
        .await
        .map_err(|e| OcrServiceError::Local(format!("OCR task failed: {}", e)))?
    }
}
