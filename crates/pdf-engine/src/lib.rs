use image::{ImageBuffer, Rgba};
use lopdf::Document;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Pixels per PDF point used when rasterizing pages for measurement.
pub const DEFAULT_RENDER_SCALE: f32 = 2.0;

/// Largest raster, in pixels, a page may rasterize to (an A0 sheet at 2x fits).
pub const DEFAULT_MAX_RASTER_PIXELS: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl Default for PageSize {
    fn default() -> Self {
        Self { width_pt: 612.0, height_pt: 792.0 }
    }
}

/// A rendered page. Measurement coordinates live in this raster's pixel space.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub pixels: RgbaImage,
}

impl Raster {
    pub fn blank(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self { width, height, pixels: RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInfo {
    pub page_sizes: Vec<PageSize>,
}

impl DocumentInfo {
    pub fn page_count(&self) -> u32 {
        self.page_sizes.len() as u32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RasterizeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("document has no pages")]
    NoPages,
    #[error("page {page} is too large to rasterize ({width_px}x{height_px} px, limit {max_pixels} px)")]
    PageTooLarge { page: u32, width_px: u64, height_px: u64, max_pixels: u64 },
    #[error("backend error: {0}")]
    Backend(String),
}

/// Turns document bytes into a pixel raster of one page.
pub trait DocumentRasterizer {
    fn inspect(&self, bytes: &[u8]) -> Result<DocumentInfo, RasterizeError>;
    fn rasterize(&self, bytes: &[u8], page_index: u32) -> Result<Raster, RasterizeError>;
}

#[derive(Debug, Clone, Copy)]
pub struct LopdfEngine {
    render_scale: f32,
    max_pixels: u64,
}

impl Default for LopdfEngine {
    fn default() -> Self {
        Self { render_scale: DEFAULT_RENDER_SCALE, max_pixels: DEFAULT_MAX_RASTER_PIXELS }
    }
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_render_scale(mut self, render_scale: f32) -> Self {
        self.render_scale = if render_scale > 0.0 { render_scale } else { DEFAULT_RENDER_SCALE };
        self
    }

    pub fn with_max_pixels(mut self, max_pixels: u64) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    pub fn render_scale(&self) -> f32 {
        self.render_scale
    }

    /// Pixel dimensions of a page at the render scale, refusing oversized pages
    /// before anything is allocated.
    fn raster_dimensions(&self, page_index: u32, page_size: PageSize) -> Result<(u32, u32), RasterizeError> {
        let scale = f64::from(self.render_scale);
        let width = (f64::from(page_size.width_pt) * scale).round().max(1.0);
        let height = (f64::from(page_size.height_pt) * scale).round().max(1.0);

        let too_large = || RasterizeError::PageTooLarge {
            page: page_index,
            width_px: width as u64,
            height_px: height as u64,
            max_pixels: self.max_pixels,
        };
        if !width.is_finite() || !height.is_finite() || width * height > self.max_pixels as f64 {
            return Err(too_large());
        }

        let width = u32::try_from(width as u64).map_err(|_| too_large())?;
        let height = u32::try_from(height as u64).map_err(|_| too_large())?;
        Ok((width, height))
    }

    fn parse_sizes(bytes: &[u8]) -> Result<Vec<PageSize>, RasterizeError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(RasterizeError::EncryptedUnsupported);
        }

        let doc = Document::load_mem(bytes)?;
        let pages = doc.get_pages();
        let mut sizes = Vec::with_capacity(pages.len());

        for (_, object_id) in pages {
            let dict = doc.get_dictionary(object_id)?;
            let size = dict
                .get(b"MediaBox")
                .ok()
                .and_then(|obj| obj.as_array().ok())
                .and_then(|array| {
                    if array.len() != 4 {
                        return None;
                    }
                    let x0 = array[0].as_float().ok()?;
                    let y0 = array[1].as_float().ok()?;
                    let x1 = array[2].as_float().ok()?;
                    let y1 = array[3].as_float().ok()?;
                    Some(PageSize { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() })
                })
                .unwrap_or_default();

            sizes.push(size);
        }

        if sizes.is_empty() {
            return Err(RasterizeError::NoPages);
        }

        Ok(sizes)
    }
}

impl DocumentRasterizer for LopdfEngine {
    fn inspect(&self, bytes: &[u8]) -> Result<DocumentInfo, RasterizeError> {
        Ok(DocumentInfo { page_sizes: Self::parse_sizes(bytes)? })
    }

    fn rasterize(&self, bytes: &[u8], page_index: u32) -> Result<Raster, RasterizeError> {
        let sizes = Self::parse_sizes(bytes)?;
        let page_size = sizes.get(page_index as usize).copied().ok_or(
            RasterizeError::PageOutOfRange { page: page_index, page_count: sizes.len() as u32 },
        )?;

        let (width, height) = self.raster_dimensions(page_index, page_size)?;
        let mut raster = Raster::blank(width, height);

        if width >= 4 && height >= 4 {
            let edge = Rgba([220, 220, 220, 255]);
            for x in 0..width {
                raster.pixels.put_pixel(x, 0, edge);
                raster.pixels.put_pixel(x, height - 1, edge);
            }
            for y in 0..height {
                raster.pixels.put_pixel(0, y, edge);
                raster.pixels.put_pixel(width - 1, y, edge);
            }
        }

        tracing::debug!(page_index, width, height, "rasterized page");
        Ok(raster)
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures {
    use lopdf::{dictionary, Document, Object, Stream};

    /// Builds an unencrypted PDF with one empty page per `(width, height)` entry.
    pub fn blank_pdf(page_sizes: &[(i64, i64)]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::with_capacity(page_sizes.len());

        for &(width, height) in page_sizes {
            let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            });
            kids.push(Object::from(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("in-memory PDF write should succeed");
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspects_page_count_and_sizes() {
        let bytes = fixtures::blank_pdf(&[(612, 792), (842, 595)]);
        let info = LopdfEngine::new().inspect(&bytes).expect("inspect should succeed");

        assert_eq!(info.page_count(), 2);
        assert_eq!(info.page_sizes[1], PageSize { width_pt: 842.0, height_pt: 595.0 });
    }

    #[test]
    fn rasterize_scales_page_box_to_pixels() {
        let bytes = fixtures::blank_pdf(&[(612, 792)]);
        let raster = LopdfEngine::new().rasterize(&bytes, 0).expect("rasterize should succeed");

        assert_eq!((raster.width, raster.height), (1224, 1584));
        assert_eq!(raster.pixels.dimensions(), (1224, 1584));
        assert_eq!(raster.pixels.get_pixel(10, 10), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn custom_render_scale_is_applied() {
        let bytes = fixtures::blank_pdf(&[(100, 50)]);
        let raster = LopdfEngine::new()
            .with_render_scale(1.0)
            .rasterize(&bytes, 0)
            .expect("rasterize should succeed");

        assert_eq!((raster.width, raster.height), (100, 50));
    }

    #[test]
    fn oversized_page_box_is_refused_without_allocating() {
        let bytes = fixtures::blank_pdf(&[(100_000, 100_000)]);
        let err = LopdfEngine::new().rasterize(&bytes, 0).expect_err("huge page should be refused");

        assert!(matches!(
            err,
            RasterizeError::PageTooLarge { page: 0, width_px: 200_000, height_px: 200_000, .. }
        ));
    }

    #[test]
    fn pixel_limit_is_configurable() {
        let bytes = fixtures::blank_pdf(&[(100, 50)]);
        let engine = LopdfEngine::new().with_render_scale(1.0);

        assert!(engine.with_max_pixels(5_000).rasterize(&bytes, 0).is_ok());
        assert!(matches!(
            engine.with_max_pixels(4_999).rasterize(&bytes, 0),
            Err(RasterizeError::PageTooLarge { .. })
        ));
    }

    #[test]
    fn page_out_of_range_returns_error() {
        let bytes = fixtures::blank_pdf(&[(612, 792)]);
        let err = LopdfEngine::new().rasterize(&bytes, 3).expect_err("page 3 should not exist");

        assert!(matches!(err, RasterizeError::PageOutOfRange { page: 3, page_count: 1 }));
    }

    #[test]
    fn garbage_bytes_fail_to_parse() {
        let err = LopdfEngine::new()
            .rasterize(b"not a pdf at all", 0)
            .expect_err("garbage should not rasterize");

        assert!(matches!(err, RasterizeError::Parse(_)));
    }

    #[test]
    fn encrypted_marker_is_rejected() {
        let mut bytes = fixtures::blank_pdf(&[(612, 792)]);
        bytes.extend_from_slice(b"\n/Encrypt\n");

        let err = LopdfEngine::new().inspect(&bytes).expect_err("encrypted should fail");
        assert!(matches!(err, RasterizeError::EncryptedUnsupported));
    }
}
