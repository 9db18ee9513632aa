//! JSON-over-HTTP client for a remote OCR/vision service.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use log::debug;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::OcrServiceError;
use crate::ocr::{OcrRequest, OcrService};

/// Maximum length of an error body kept in diagnostics.
const MAX_ERROR_BODY_LENGTH: usize = 200;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub const DEFAULT_PROMPT: &str = "Extract all text from these scanned pages exactly as written. \
Preserve line breaks and reading order. Return only the extracted text.";

fn sanitize_error_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let truncated: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", truncated)
    } else {
        body.to_string()
    }
}

/// Connection settings for [`HttpOcrService`].
#[derive(Debug, Clone)]
pub struct HttpOcrSettings {
    pub endpoint: String,
    pub model: Option<String>,
    pub prompt: String,
    pub api_key: Option<SecretString>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl HttpOcrSettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: None,
            prompt: DEFAULT_PROMPT.to_string(),
            api_key: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeRequest<'a> {
    batch_index: usize,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    pages: Vec<PagePayload>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PagePayload {
    index: usize,
    mime_type: &'static str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    text: String,
}

/// OCR service reached over HTTP.
///
/// Each call POSTs the batch's pages as base64 and expects `{"text": ...}`
/// back. Any non-2xx status is an [`OcrServiceError::Api`].
pub struct HttpOcrService {
    client: Client,
    settings: HttpOcrSettings,
}

impl HttpOcrService {
    pub fn new(settings: HttpOcrSettings) -> Result<Self, OcrServiceError> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self { client, settings })
    }

    pub fn endpoint(&self) -> &str {
        &self.settings.endpoint
    }

    fn build_body<'a>(&'a self, request: &OcrRequest<'_>) -> RecognizeRequest<'a> {
        let engine = base64::engine::general_purpose::STANDARD;
        RecognizeRequest {
            batch_index: request.batch_index,
            prompt: &self.settings.prompt,
            model: self.settings.model.as_deref(),
            pages: request
                .pages
                .iter()
                .map(|page| PagePayload {
                    index: page.index,
                    mime_type: page.encoding.mime_type(),
                    data: engine.encode(&page.data),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl OcrService for HttpOcrService {
    async fn recognize(&self, request: OcrRequest<'_>) -> Result<String, OcrServiceError> {
        let body = self.build_body(&request);

        debug!(
            "POST {} batch {} ({} pages)",
            self.settings.endpoint,
            request.batch_index,
            request.pages.len()
        );

        let mut builder = self.client.post(&self.settings.endpoint).json(&body);
        if let Some(key) = &self.settings.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OcrServiceError::Api {
                status: status.as_u16(),
                message: sanitize_error_body(body.trim()),
            });
        }

        let parsed: RecognizeResponse = response
            .json()
            .await
            .map_err(|e| OcrServiceError::InvalidResponse(e.to_string()))?;

        Ok(parsed.text)
    }
}
