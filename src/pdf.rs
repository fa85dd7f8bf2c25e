//! Minimal PDF writer for paginated captures.
//!
//! Each distinct bitmap is JPEG-encoded once and embedded as an image XObject.
//! Every page draws the full image scaled to the page width and shifted by the
//! page's offset; the MediaBox clips it down to that page's slice.

use std::fmt::Write as _;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage};

use crate::capture::Bitmap;
use crate::page::POINTS_PER_MM;
use crate::paginate::PageImage;
use crate::{PrestoError, Result};

#[derive(Debug, Clone)]
pub struct PdfOptions {
    pub jpeg_quality: u8,
    pub title: Option<String>,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: 92,
            title: None,
        }
    }
}

const CATALOG_ID: usize = 1;
const PAGES_ID: usize = 2;
const INFO_ID: usize = 3;
const FIRST_IMAGE_ID: usize = 4;

pub fn encode_pdf(pages: &[PageImage], options: &PdfOptions) -> Result<Vec<u8>> {
    if pages.is_empty() {
        return Err(PrestoError::EmptyCapture {
            width: 0,
            height: 0,
        });
    }

    let mut images: Vec<&Arc<Bitmap>> = Vec::new();
    let mut page_images = Vec::with_capacity(pages.len());
    for page in pages {
        let slot = match images.iter().position(|b| Arc::ptr_eq(b, &page.bitmap)) {
            Some(slot) => slot,
            None => {
                images.push(&page.bitmap);
                images.len() - 1
            }
        };
        page_images.push(slot);
    }

    let first_page_id = FIRST_IMAGE_ID + images.len();
    let page_id = |i: usize| first_page_id + 2 * i;
    let mut writer = PdfWriter::new();

    writer.object(
        CATALOG_ID,
        format!("<< /Type /Catalog /Pages {PAGES_ID} 0 R >>").as_bytes(),
    );

    let kids = (0..pages.len())
        .map(|i| format!("{} 0 R", page_id(i)))
        .collect::<Vec<_>>()
        .join(" ");
    writer.object(
        PAGES_ID,
        format!("<< /Type /Pages /Kids [{kids}] /Count {} >>", pages.len()).as_bytes(),
    );

    let mut info = String::from("<< /Producer (presto)");
    if let Some(title) = &options.title {
        let _ = write!(info, " /Title {}", text_string(title));
    }
    info.push_str(" >>");
    writer.object(INFO_ID, info.as_bytes());

    for (slot, bitmap) in images.iter().enumerate() {
        let jpeg = encode_jpeg(bitmap, options.jpeg_quality)?;
        let header = format!(
            "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /DCTDecode /Length {} >>",
            bitmap.width(),
            bitmap.height(),
            jpeg.len()
        );
        writer.stream(FIRST_IMAGE_ID + slot, &header, &jpeg);
    }

    for (i, page) in pages.iter().enumerate() {
        let width_pt = page.width_mm * POINTS_PER_MM;
        let height_pt = page.page_height_mm * POINTS_PER_MM;
        let image_height_pt = page.image_height_mm * POINTS_PER_MM;
        // Top edge of the image sits `origin_offset_y` below the page top.
        let image_bottom = height_pt + page.origin_offset_y_mm * POINTS_PER_MM - image_height_pt;
        let slot = page_images[i];

        let content = format!(
            "q\n{width_pt:.4} 0 0 {image_height_pt:.4} 0 {image_bottom:.4} cm\n/Im{slot} Do\nQ\n"
        );
        let resources = format!("/XObject << /Im{slot} {} 0 R >>", FIRST_IMAGE_ID + slot);
        writer.object(
            page_id(i),
            format!(
                "<< /Type /Page /Parent {PAGES_ID} 0 R /MediaBox [0 0 {width_pt:.4} {height_pt:.4}] /Resources << {resources} >> /Contents {} 0 R >>",
                page_id(i) + 1
            )
            .as_bytes(),
        );
        writer.stream(
            page_id(i) + 1,
            &format!("<< /Length {} >>", content.len()),
            content.as_bytes(),
        );
    }

    Ok(writer.finish())
}

fn encode_jpeg(bitmap: &Bitmap, quality: u8) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgba8(bitmap.as_rgba().clone()).into_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ColorType::Rgb8,
    )?;
    Ok(out)
}

/// UTF-16BE hex string with BOM, valid for any text.
fn text_string(text: &str) -> String {
    let mut out = String::from("<FEFF");
    for unit in text.encode_utf16() {
        let _ = write!(out, "{unit:04X}");
    }
    out.push('>');
    out
}

struct PdfWriter {
    buf: Vec<u8>,
    offsets: Vec<(usize, usize)>,
}

impl PdfWriter {
    fn new() -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");
        Self {
            buf,
            offsets: Vec::new(),
        }
    }

    fn begin(&mut self, id: usize) {
        self.offsets.push((id, self.buf.len()));
        self.buf
            .extend_from_slice(format!("{id} 0 obj\n").as_bytes());
    }

    fn object(&mut self, id: usize, body: &[u8]) {
        self.begin(id);
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(b"\nendobj\n");
    }

    fn stream(&mut self, id: usize, header: &str, data: &[u8]) {
        self.begin(id);
        self.buf.extend_from_slice(header.as_bytes());
        self.buf.extend_from_slice(b"\nstream\n");
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\nendstream\nendobj\n");
    }

    fn finish(mut self) -> Vec<u8> {
        self.offsets.sort_by_key(|(id, _)| *id);
        let size = self.offsets.len() + 1;
        let xref_at = self.buf.len();

        let mut xref = format!("xref\n0 {size}\n0000000000 65535 f \n");
        for (_, offset) in &self.offsets {
            let _ = write!(xref, "{offset:010} 00000 n \n");
        }
        let _ = write!(
            xref,
            "trailer\n<< /Size {size} /Root {CATALOG_ID} 0 R /Info {INFO_ID} 0 R >>\nstartxref\n{xref_at}\n%%EOF\n"
        );
        self.buf.extend_from_slice(xref.as_bytes());
        self.buf
    }
}
