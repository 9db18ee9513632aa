use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ProcessError;
use crate::raster::{
    encode_page, ColorMode, DocumentFormat, PageEncoding, RasterOptions, RasterizedPages,
    Rasterizer, SourceDocument,
};

/// Renders PDF pages through poppler's `pdftoppm`, one page per iterator step.
pub struct PdfRasterizer;

impl PdfRasterizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Rasterizer for PdfRasterizer {
    fn rasterize(
        &self,
        document: SourceDocument,
        options: &RasterOptions,
    ) -> Result<RasterizedPages, ProcessError> {
        let _span = tracing::info_span!("raster.pdf", source = %document.name).entered();

        let page_count = match lopdf::Document::load_mem(&document.bytes) {
            Ok(doc) => doc.get_pages().len(),
            Err(e) => {
                // lopdf rejects some damaged cross-reference tables that poppler
                // still renders.
                tracing::warn!(
                    "lopdf failed to parse {}: {}. Asking pdfinfo for the page count.",
                    document.name,
                    e
                );
                count_pdf_pages(&document.bytes)?
            }
        };

        if page_count == 0 {
            return Err(ProcessError::NoPages);
        }

        let temp_pdf = TempPdf::write(&document.bytes)?;
        let options = options.clone();
        let pages = (1..=page_count).map(move |page_num| {
            let img = render_pdf_page(temp_pdf.path(), page_num as u32, &options)?;
            encode_page(img, page_num - 1, &options)
        });

        Ok(RasterizedPages::new(page_count, pages))
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Pdf)
    }
}

/// Temporary copy of the PDF on disk, removed when dropped.
struct TempPdf {
    path: PathBuf,
}

impl TempPdf {
    fn write(bytes: &[u8]) -> Result<Self, ProcessError> {
        let path = std::env::temp_dir().join(format!("ocrflow_{}.pdf", uuid::Uuid::new_v4()));
        std::fs::write(&path, bytes)
            .map_err(|e| ProcessError::PdfProcessing(format!("Failed to write temp PDF: {}", e)))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempPdf {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Get the page count of a PDF using pdfinfo (poppler-utils).
fn count_pdf_pages(pdf_bytes: &[u8]) -> Result<usize, ProcessError> {
    let temp_pdf = TempPdf::write(pdf_bytes)?;

    let output = Command::new("pdfinfo")
        .arg(temp_pdf.path())
        .output()
        .map_err(|e| {
            ProcessError::PdfProcessing(format!(
                "Failed to run pdfinfo: {}. Make sure poppler-utils is installed.",
                e
            ))
        })?;

    if !output.status.success() {
        return Err(ProcessError::PdfProcessing(format!(
            "pdfinfo failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_pdfinfo_pages(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
        ProcessError::PdfProcessing("pdfinfo did not report a page count".to_string())
    })
}

fn parse_pdfinfo_pages(stdout: &str) -> Option<usize> {
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix("Pages:"))
        .find_map(|count| count.trim().parse::<usize>().ok())
}

fn pdftoppm_args(pdf_path: &Path, output_prefix: &Path, page_num: u32, options: &RasterOptions) -> Vec<String> {
    let mut args = vec![
        match options.encoding {
            PageEncoding::Png => "-png".to_string(),
            PageEncoding::Jpeg => "-jpeg".to_string(),
        },
        "-r".to_string(),
        options.dpi.to_string(),
        "-f".to_string(),
        page_num.to_string(),
        "-l".to_string(),
        page_num.to_string(),
        "-singlefile".to_string(),
    ];
    if options.color_mode == ColorMode::Grayscale {
        args.push("-gray".to_string());
    }
    args.push(pdf_path.display().to_string());
    args.push(output_prefix.display().to_string());
    args
}

fn render_pdf_page(
    pdf_path: &Path,
    page_num: u32,
    options: &RasterOptions,
) -> Result<image::DynamicImage, ProcessError> {
    let output_prefix =
        std::env::temp_dir().join(format!("ocrflow_page_{}", uuid::Uuid::new_v4()));

    let output = Command::new("pdftoppm")
        .args(pdftoppm_args(pdf_path, &output_prefix, page_num, options))
        .output()
        .map_err(|e| {
            ProcessError::PdfProcessing(format!(
                "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
                e
            ))
        })?;

    if !output.status.success() {
        return Err(ProcessError::PdfProcessing(format!(
            "pdftoppm failed on page {}: {}",
            page_num,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    // -singlefile writes exactly `<prefix>.<ext>`
    let image_path = PathBuf::from(format!(
        "{}.{}",
        output_prefix.display(),
        options.encoding.extension()
    ));
    let image_data = std::fs::read(&image_path).map_err(|e| {
        ProcessError::PdfProcessing(format!("Failed to read rendered page {}: {}", page_num, e))
    })?;
    let _ = std::fs::remove_file(&image_path);

    image::load_from_memory(&image_data).map_err(|e| {
        ProcessError::PdfProcessing(format!("Rendered page {} is not an image: {}", page_num, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Document, Object};

    fn pdf_with_pages(count: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut kids = Vec::new();
        for _ in 0..count {
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(Object::from(page_id));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count as i64,
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut pdf_bytes = Vec::new();
        doc.save_to(&mut pdf_bytes).unwrap();
        pdf_bytes
    }

    #[test]
    fn test_supports_pdf_format() {
        let rasterizer = PdfRasterizer::new();
        assert!(rasterizer.supports(DocumentFormat::Pdf));
        assert!(!rasterizer.supports(DocumentFormat::Image));
    }

    #[test]
    fn test_page_count_known_before_rendering() {
        let rasterizer = PdfRasterizer::new();
        let doc = SourceDocument::new("paper.pdf", pdf_with_pages(3));

        // No page is rendered until the iterator is advanced, so this does
        // not need poppler.
        let pages = rasterizer
            .rasterize(doc, &RasterOptions::default())
            .unwrap();
        assert_eq!(pages.page_count(), 3);
    }

    #[test]
    fn test_zero_page_pdf_fails_fast() {
        let rasterizer = PdfRasterizer::new();
        let doc = SourceDocument::new("empty.pdf", pdf_with_pages(0));

        match rasterizer.rasterize(doc, &RasterOptions::default()) {
            Err(ProcessError::NoPages) => {}
            Err(e) => panic!("Expected NoPages, got {}", e),
            Ok(_) => panic!("Expected NoPages, got pages"),
        }
    }

    #[test]
    fn test_temp_pdf_removed_on_drop() {
        let temp = TempPdf::write(b"%PDF-1.5").unwrap();
        let path = temp.path().to_path_buf();
        assert!(path.exists());
        drop(temp);
        assert!(!path.exists());
    }

    #[test]
    fn test_parse_pdfinfo_pages() {
        let stdout = "Producer:       poppler\nPages:          25\nEncrypted:      no\n";
        assert_eq!(parse_pdfinfo_pages(stdout), Some(25));
        assert_eq!(parse_pdfinfo_pages("Title: x\n"), None);
    }

    #[test]
    fn test_pdftoppm_args_grayscale_png() {
        let args = pdftoppm_args(
            Path::new("/tmp/in.pdf"),
            Path::new("/tmp/out"),
            4,
            &RasterOptions::default(),
        );
        assert_eq!(args[0], "-png");
        assert!(args.windows(2).any(|w| w[0] == "-r" && w[1] == "150"));
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "4"));
        assert!(args.windows(2).any(|w| w[0] == "-l" && w[1] == "4"));
        assert!(args.contains(&"-gray".to_string()));
        assert_eq!(args[args.len() - 1], "/tmp/out");
    }

    #[test]
    fn test_pdftoppm_args_color_jpeg() {
        let options = RasterOptions {
            color_mode: ColorMode::Color,
            encoding: PageEncoding::Jpeg,
            ..RasterOptions::default()
        };
        let args = pdftoppm_args(Path::new("in.pdf"), Path::new("out"), 1, &options);
        assert_eq!(args[0], "-jpeg");
        assert!(!args.contains(&"-gray".to_string()));
    }
}
