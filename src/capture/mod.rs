//! Document capture: rasterizes a DOM subtree into a bitmap.
//!
//! # Module Structure
//!
//! - [`rasterizer`] - Capture orchestration, scoped chrome hiding and size normalization
//! - [`playwright`] - Headless Chromium surface driven by a Node.js helper
//!
//! The DOM itself is reached through the [`DocumentSurface`] trait so the
//! capture logic runs the same against a live browser or an in-memory fake.

mod playwright;
mod rasterizer;

use async_trait::async_trait;
use image::{DynamicImage, RgbaImage};

use crate::config::CaptureConfig;
use crate::{PrestoError, Result};

pub use playwright::{PlaywrightOptions, PlaywrightSurface};
pub use rasterizer::{output_dimensions, with_hidden_chrome, Rasterizer};

/// A DOM node to rasterize, with the options the capture runs under.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureTarget {
    /// CSS selector resolving to the node.
    pub selector: String,
    pub scale: f32,
    /// Reload allow-listed cross-origin images with CORS before painting.
    pub use_cors: bool,
    pub background: [u8; 3],
    pub hidden_selectors: Vec<String>,
    /// Origins besides the page's own whose assets may appear in the capture.
    pub allowed_origins: Vec<String>,
}

impl CaptureTarget {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            scale: 2.0,
            use_cors: true,
            background: [255, 255, 255],
            hidden_selectors: Vec::new(),
            allowed_origins: Vec::new(),
        }
    }

    pub fn from_config(selector: impl Into<String>, config: &CaptureConfig) -> Result<Self> {
        Ok(Self {
            selector: selector.into(),
            scale: config.scale,
            use_cors: config.use_cors,
            background: parse_background(&config.background)?,
            hidden_selectors: config.hidden_selectors.clone(),
            allowed_origins: config.allowed_origins.clone(),
        })
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn hiding(mut self, selector: impl Into<String>) -> Self {
        self.hidden_selectors.push(selector.into());
        self
    }
}

/// Layout of a resolved node, in CSS pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLayout {
    /// Surface-specific handle for the node.
    pub node_id: String,
    pub width: f64,
    pub height: f64,
    pub visible: bool,
}

impl NodeLayout {
    pub fn is_laid_out(&self) -> bool {
        self.visible && self.width > 0.0 && self.height > 0.0
    }
}

/// Options forwarded to the surface for a single render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub scale: f32,
    pub use_cors: bool,
    pub background: [u8; 3],
    pub allowed_origins: Vec<String>,
}

impl From<&CaptureTarget> for RenderRequest {
    fn from(target: &CaptureTarget) -> Self {
        Self {
            scale: target.scale,
            use_cors: target.use_cors,
            background: target.background,
            allowed_origins: target.allowed_origins.clone(),
        }
    }
}

/// Rendering backend holding the live document.
#[async_trait]
pub trait DocumentSurface: Send + Sync {
    /// Resolve a selector to an attached node; `None` when nothing matches.
    async fn resolve(&self, selector: &str) -> Result<Option<NodeLayout>>;

    /// Hide or restore every element matching `selectors` inside `node`.
    async fn set_chrome_hidden(
        &self,
        node: &NodeLayout,
        selectors: &[String],
        hidden: bool,
    ) -> Result<()>;

    /// Paint `node` into an image. Cross-origin assets outside the allow-list
    /// must fail with [`PrestoError::CrossOriginAsset`].
    async fn render(&self, node: &NodeLayout, request: &RenderRequest) -> Result<DynamicImage>;
}

/// A captured bitmap, always opaque RGBA with non-zero dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    image: RgbaImage,
}

impl Bitmap {
    pub fn new(image: RgbaImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PrestoError::EmptyCapture { width, height });
        }
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_inner(self) -> RgbaImage {
        self.image
    }
}

/// Parse a `#rrggbb` (or `#rgb`) colour.
pub fn parse_background(value: &str) -> Result<[u8; 3]> {
    let invalid = || {
        PrestoError::Config(format!(
            "Invalid background colour {:?}; expected #rrggbb",
            value
        ))
    };
    let hex = value.trim().strip_prefix('#').ok_or_else(invalid)?;
    if !hex.is_ascii() {
        return Err(invalid());
    }
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return Err(invalid()),
    };
    let mut rgb = [0u8; 3];
    for (i, channel) in rgb.iter_mut().enumerate() {
        *channel = u8::from_str_radix(&expanded[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
    }
    Ok(rgb)
}
