pub mod image;
pub mod pdf;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ProcessError;

pub use self::image::ImageRasterizer;
pub use self::pdf::PdfRasterizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Image,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "png" | "jpg" | "jpeg" | "tiff" | "tif" | "bmp" | "gif" | "webp" => {
                Some(DocumentFormat::Image)
            }
            _ => None,
        }
    }

    /// Detects the format from a source reference, falling back to the
    /// content's magic bytes when the name carries no usable extension.
    pub fn detect(name: &str, bytes: &[u8]) -> Option<Self> {
        let by_mime = mime_guess::from_path(name).first().and_then(|mime| {
            match (mime.type_().as_str(), mime.subtype().as_str()) {
                ("application", "pdf") => Some(DocumentFormat::Pdf),
                ("image", _) => Some(DocumentFormat::Image),
                _ => None,
            }
        });
        if by_mime.is_some() {
            return by_mime;
        }

        if bytes.starts_with(b"%PDF-") {
            return Some(DocumentFormat::Pdf);
        }
        ::image::guess_format(bytes)
            .ok()
            .map(|_| DocumentFormat::Image)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    Grayscale,
    Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageEncoding {
    Png,
    Jpeg,
}

impl PageEncoding {
    pub fn mime_type(&self) -> &'static str {
        match self {
            PageEncoding::Png => "image/png",
            PageEncoding::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            PageEncoding::Png => "png",
            PageEncoding::Jpeg => "jpg",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterOptions {
    /// Render resolution for PDF pages.
    pub dpi: u32,
    pub color_mode: ColorMode,
    pub encoding: PageEncoding,
    /// Longest edge in pixels; larger pages are downscaled.
    pub max_dimension: Option<u32>,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            dpi: 150,
            color_mode: ColorMode::Grayscale,
            encoding: PageEncoding::Png,
            max_dimension: Some(2000),
        }
    }
}

/// One rasterized page image.
#[derive(Clone)]
pub struct Page {
    /// Zero-based position in the source document.
    pub index: usize,
    pub data: Vec<u8>,
    pub encoding: PageEncoding,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("bytes", &self.data.len())
            .field("encoding", &self.encoding)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// A fetched source document, ready to be rasterized.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Locator the document was fetched from; also used for format detection.
    pub name: String,
    pub bytes: Arc<[u8]>,
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn format(&self) -> Option<DocumentFormat> {
        DocumentFormat::detect(&self.name, &self.bytes)
    }
}

/// Lazy, finite, ordered sequence of pages. The page count is known before
/// any page is rendered.
pub struct RasterizedPages {
    page_count: usize,
    pages: Box<dyn Iterator<Item = Result<Page, ProcessError>> + Send>,
}

impl RasterizedPages {
    pub fn new(
        page_count: usize,
        pages: impl Iterator<Item = Result<Page, ProcessError>> + Send + 'static,
    ) -> Self {
        Self {
            page_count,
            pages: Box::new(pages),
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }
}

impl Iterator for RasterizedPages {
    type Item = Result<Page, ProcessError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pages.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pages.size_hint()
    }
}

pub trait Rasterizer: Send + Sync {
    fn rasterize(
        &self,
        document: SourceDocument,
        options: &RasterOptions,
    ) -> Result<RasterizedPages, ProcessError>;

    fn supports(&self, format: DocumentFormat) -> bool;
}

pub struct RasterizerRegistry {
    rasterizers: Vec<Box<dyn Rasterizer>>,
}

impl RasterizerRegistry {
    pub fn new() -> Self {
        Self {
            rasterizers: vec![Box::new(PdfRasterizer::new()), Box::new(ImageRasterizer::new())],
        }
    }

    /// Builds a registry from an explicit set of rasterizers.
    pub fn with_rasterizers(rasterizers: Vec<Box<dyn Rasterizer>>) -> Self {
        Self { rasterizers }
    }

    pub fn rasterize(
        &self,
        document: SourceDocument,
        options: &RasterOptions,
    ) -> Result<RasterizedPages, ProcessError> {
        let format = document
            .format()
            .ok_or_else(|| ProcessError::UnsupportedFormat(describe_source(&document.name)))?;

        for rasterizer in &self.rasterizers {
            if rasterizer.supports(format) {
                let pages = rasterizer.rasterize(document, options)?;
                if pages.page_count() == 0 {
                    return Err(ProcessError::NoPages);
                }
                return Ok(pages);
            }
        }

        Err(ProcessError::UnsupportedFormat(describe_source(&document.name)))
    }

    /// Rasterizes and renders every page. Any page failure fails the whole
    /// document.
    pub fn rasterize_all(
        &self,
        document: SourceDocument,
        options: &RasterOptions,
    ) -> Result<Vec<Page>, ProcessError> {
        let pages = self.rasterize(document, options)?;
        let expected = pages.page_count();
        let rendered = pages.collect::<Result<Vec<_>, _>>()?;
        if rendered.len() != expected {
            return Err(ProcessError::PdfProcessing(format!(
                "Expected {} pages, rendered {}",
                expected,
                rendered.len()
            )));
        }
        Ok(rendered)
    }
}

impl Default for RasterizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn describe_source(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Applies color mode and size limits, then encodes the image.
pub(crate) fn encode_page(
    img: ::image::DynamicImage,
    index: usize,
    options: &RasterOptions,
) -> Result<Page, ProcessError> {
    let mut img = img;

    if let Some(max) = options.max_dimension {
        if img.width() > max || img.height() > max {
            img = img.resize(max, max, ::image::imageops::FilterType::Lanczos3);
        }
    }

    let img = match options.color_mode {
        ColorMode::Grayscale => ::image::DynamicImage::ImageLuma8(img.to_luma8()),
        ColorMode::Color => ::image::DynamicImage::ImageRgb8(img.to_rgb8()),
    };

    let format = match options.encoding {
        PageEncoding::Png => ::image::ImageFormat::Png,
        PageEncoding::Jpeg => ::image::ImageFormat::Jpeg,
    };

    let mut data = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut data), format)
        .map_err(|e| ProcessError::ImageProcessing(format!("Failed to encode page: {}", e)))?;

    Ok(Page {
        index,
        data,
        encoding: options.encoding,
        width: img.width(),
        height: img.height(),
    })
}
