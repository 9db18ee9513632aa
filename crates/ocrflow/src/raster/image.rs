use crate::error::ProcessError;
use crate::raster::{
    encode_page, DocumentFormat, RasterOptions, RasterizedPages, Rasterizer, SourceDocument,
};

/// Single-image documents (photos, scans). Always yields exactly one page.
pub struct ImageRasterizer;

impl ImageRasterizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImageRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Rasterizer for ImageRasterizer {
    fn rasterize(
        &self,
        document: SourceDocument,
        options: &RasterOptions,
    ) -> Result<RasterizedPages, ProcessError> {
        let _span = tracing::info_span!("raster.image", source = %document.name).entered();

        // Decode eagerly so a corrupt upload fails before any page is handed out.
        let img = image::load_from_memory(&document.bytes)
            .map_err(|e| ProcessError::ImageProcessing(format!("Failed to load image: {}", e)))?;

        let page = encode_page(img, 0, options);
        Ok(RasterizedPages::new(1, std::iter::once(page)))
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Image)
    }
}
