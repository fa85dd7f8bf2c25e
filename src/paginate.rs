//! Slices a captured bitmap into fixed-size pages.
//!
//! The bitmap is scaled uniformly to the page width. Every page shows the whole
//! scaled image translated upward by a multiple of the page height, so each
//! page window reveals the next vertical slice.

use std::sync::Arc;

use crate::capture::Bitmap;
use crate::{PrestoError, Result};

/// One page of a paginated document, in millimetres.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub index: usize,
    pub width_mm: f64,
    pub page_height_mm: f64,
    /// Height of content this page covers; the last page may be partial.
    pub height_mm: f64,
    /// Vertical translation of the full image on this page (0 or negative).
    pub origin_offset_y_mm: f64,
    /// Height of the whole image once scaled to the page width.
    pub image_height_mm: f64,
    pub bitmap: Arc<Bitmap>,
}

impl PageImage {
    /// Offset of this page's slice from the top of the scaled image.
    pub fn slice_top_mm(&self) -> f64 {
        -self.origin_offset_y_mm
    }
}

/// Height of `bitmap` once scaled to `page_width_mm`.
pub fn scaled_height(bitmap: &Bitmap, page_width_mm: f64) -> f64 {
    f64::from(bitmap.height()) * page_width_mm / f64::from(bitmap.width())
}

pub fn paginate(
    bitmap: Arc<Bitmap>,
    page_width_mm: f64,
    page_height_mm: f64,
) -> Result<Vec<PageImage>> {
    if bitmap.width() == 0 || bitmap.height() == 0 {
        return Err(PrestoError::EmptyCapture {
            width: bitmap.width(),
            height: bitmap.height(),
        });
    }
    if !(page_width_mm > 0.0 && page_height_mm > 0.0)
        || !page_width_mm.is_finite()
        || !page_height_mm.is_finite()
    {
        return Err(PrestoError::Config(format!(
            "page size must be positive, got {}x{} mm",
            page_width_mm, page_height_mm
        )));
    }

    let img_height = scaled_height(&bitmap, page_width_mm);
    let mut remaining = img_height;
    let mut position = 0.0;
    let mut pages = Vec::with_capacity((img_height / page_height_mm).ceil() as usize);

    while remaining > 0.0 {
        pages.push(PageImage {
            index: pages.len(),
            width_mm: page_width_mm,
            page_height_mm,
            height_mm: remaining.min(page_height_mm),
            origin_offset_y_mm: position,
            image_height_mm: img_height,
            bitmap: Arc::clone(&bitmap),
        });
        remaining -= page_height_mm;
        position -= page_height_mm;
    }

    tracing::debug!(
        pages = pages.len(),
        scaled_height_mm = img_height,
        "Paginated capture"
    );
    Ok(pages)
}
