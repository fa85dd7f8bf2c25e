//! Capture orchestration over a [`DocumentSurface`].

use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use futures::FutureExt;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{Bitmap, CaptureTarget, DocumentSurface, NodeLayout, RenderRequest};
use crate::progress::{log_progress, ProgressCallback};
use crate::{PrestoError, Result};

/// Default time a single render may take before it is reported as unsettled.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(20);

pub struct Rasterizer<S> {
    surface: S,
    timeout: Duration,
    progress: Option<ProgressCallback>,
}

impl<S: DocumentSurface> Rasterizer<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            timeout: DEFAULT_CAPTURE_TIMEOUT,
            progress: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Capture `target` into a bitmap of exactly `floor(layout * scale)` pixels.
    pub async fn capture(&self, target: &CaptureTarget) -> Result<Bitmap> {
        if !(target.scale > 0.0 && target.scale.is_finite()) {
            return Err(PrestoError::Config(format!(
                "capture scale must be positive, got {}",
                target.scale
            )));
        }

        let node = self
            .surface
            .resolve(&target.selector)
            .await?
            .ok_or_else(|| PrestoError::TargetNotFound(target.selector.clone()))?;
        if !node.is_laid_out() {
            return Err(PrestoError::TargetNotFound(format!(
                "{} is not laid out ({}x{}, visible: {})",
                target.selector, node.width, node.height, node.visible
            )));
        }

        let (width, height) = output_dimensions(&node, target.scale);
        if width == 0 || height == 0 {
            return Err(PrestoError::EmptyCapture { width, height });
        }

        log_progress(
            &self.progress,
            &format!(
                "Capturing {} at {}x ({}x{} px)…",
                target.selector, target.scale, width, height
            ),
        );
        let start = Instant::now();
        let request = RenderRequest::from(target);
        let rendered = with_hidden_chrome(&self.surface, &node, &target.hidden_selectors, || {
            self.render_with_timeout(&node, &request)
        })
        .await?;

        let mut image = rendered.to_rgba8();
        if image.dimensions() != (width, height) {
            debug!(
                rendered_width = image.width(),
                rendered_height = image.height(),
                width,
                height,
                "Normalizing rendered bitmap to layout size"
            );
            image = imageops::resize(&image, width, height, FilterType::Lanczos3);
        }
        flatten_onto(&mut image, target.background);

        log_progress(
            &self.progress,
            &format!("Capture finished in {:.1}s", start.elapsed().as_secs_f32()),
        );
        Bitmap::new(image)
    }

    async fn render_with_timeout(
        &self,
        node: &NodeLayout,
        request: &RenderRequest,
    ) -> Result<image::DynamicImage> {
        match timeout(self.timeout, self.surface.render(node, request)).await {
            Ok(result) => result,
            Err(_) => Err(PrestoError::CaptureTimeout(self.timeout)),
        }
    }
}

/// Pixel size of a capture; fractional pixels are floored.
pub fn output_dimensions(node: &NodeLayout, scale: f32) -> (u32, u32) {
    let scale = f64::from(scale);
    let floor = |value: f64| (value * scale).floor().max(0.0) as u32;
    (floor(node.width), floor(node.height))
}

/// Run `body` with the chrome inside `node` hidden, restoring it on every exit
/// path: success, error, timeout and panic.
pub async fn with_hidden_chrome<S, F, Fut, T>(
    surface: &S,
    node: &NodeLayout,
    selectors: &[String],
    body: F,
) -> Result<T>
where
    S: DocumentSurface + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if selectors.is_empty() {
        return body().await;
    }

    if let Err(err) = surface.set_chrome_hidden(node, selectors, true).await {
        restore_chrome(surface, node, selectors).await;
        return Err(err);
    }

    let outcome = AssertUnwindSafe(body()).catch_unwind().await;
    let restored = surface.set_chrome_hidden(node, selectors, false).await;

    match outcome {
        Err(panic) => {
            if let Err(err) = restored {
                warn!(error = %err, "Failed to restore chrome after a panicking capture");
            }
            resume_unwind(panic)
        }
        Ok(Err(err)) => {
            if let Err(restore_err) = restored {
                warn!(error = %restore_err, "Failed to restore chrome after a failed capture");
            }
            Err(err)
        }
        Ok(Ok(value)) => {
            restored?;
            Ok(value)
        }
    }
}

async fn restore_chrome<S: DocumentSurface + ?Sized>(
    surface: &S,
    node: &NodeLayout,
    selectors: &[String],
) {
    if let Err(err) = surface.set_chrome_hidden(node, selectors, false).await {
        warn!(error = %err, "Failed to restore chrome after hiding failed");
    }
}

/// Composite translucent pixels over the background so every page is opaque.
fn flatten_onto(image: &mut RgbaImage, background: [u8; 3]) {
    for pixel in image.pixels_mut() {
        let Rgba([r, g, b, a]) = *pixel;
        if a == 255 {
            continue;
        }
        let alpha = u16::from(a);
        let blend = |fg: u8, bg: u8| -> u8 {
            ((u16::from(fg) * alpha + u16::from(bg) * (255 - alpha) + 127) / 255) as u8
        };
        *pixel = Rgba([
            blend(r, background[0]),
            blend(g, background[1]),
            blend(b, background[2]),
            255,
        ]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::DynamicImage;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeSurface {
        layout: Option<NodeLayout>,
        render_size: (u32, u32),
        fail_render: Option<fn() -> PrestoError>,
        stall: bool,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl FakeSurface {
        fn with_layout(width: f64, height: f64) -> Self {
            Self {
                layout: Some(NodeLayout {
                    node_id: "node-0".into(),
                    width,
                    height,
                    visible: true,
                }),
                render_size: ((width * 2.0) as u32, (height * 2.0) as u32),
                ..Self::default()
            }
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DocumentSurface for FakeSurface {
        async fn resolve(&self, _selector: &str) -> Result<Option<NodeLayout>> {
            Ok(self.layout.clone())
        }

        async fn set_chrome_hidden(
            &self,
            _node: &NodeLayout,
            _selectors: &[String],
            hidden: bool,
        ) -> Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(if hidden { "hide" } else { "restore" }.to_string());
            Ok(())
        }

        async fn render(&self, _node: &NodeLayout, _request: &RenderRequest) -> Result<DynamicImage> {
            self.events.lock().unwrap().push("render".to_string());
            if self.stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if let Some(fail) = self.fail_render {
                return Err(fail());
            }
            let (w, h) = self.render_size;
            Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                w,
                h,
                Rgba([10, 20, 30, 255]),
            )))
        }
    }

    fn target() -> CaptureTarget {
        CaptureTarget::new("#presupuesto").hiding("button")
    }

    #[tokio::test]
    async fn capture_scales_layout_and_restores_chrome() {
        let rasterizer = Rasterizer::new(FakeSurface::with_layout(1000.0, 2000.0));
        let bitmap = rasterizer.capture(&target()).await.expect("capture");

        assert_eq!((bitmap.width(), bitmap.height()), (2000, 4000));
        assert_eq!(
            rasterizer.surface().events(),
            vec!["hide", "render", "restore"]
        );
    }

    #[tokio::test]
    async fn fractional_layout_is_floored() {
        let mut surface = FakeSurface::with_layout(100.7, 50.3);
        surface.render_size = (203, 101);
        let rasterizer = Rasterizer::new(surface);
        let bitmap = rasterizer
            .capture(&CaptureTarget::new("#doc").with_scale(1.5))
            .await
            .expect("capture");

        assert_eq!((bitmap.width(), bitmap.height()), (151, 75));
    }

    #[tokio::test]
    async fn missing_target_is_reported() {
        let rasterizer = Rasterizer::new(FakeSurface::default());
        let err = rasterizer.capture(&target()).await.unwrap_err();
        assert!(matches!(err, PrestoError::TargetNotFound(sel) if sel == "#presupuesto"));
        assert!(rasterizer.surface().events().is_empty());
    }

    #[tokio::test]
    async fn zero_sized_target_is_not_found() {
        let rasterizer = Rasterizer::new(FakeSurface::with_layout(0.0, 120.0));
        let err = rasterizer.capture(&target()).await.unwrap_err();
        assert!(matches!(err, PrestoError::TargetNotFound(_)));
    }

    #[tokio::test]
    async fn chrome_is_restored_when_render_fails() {
        let mut surface = FakeSurface::with_layout(100.0, 100.0);
        surface.fail_render = Some(|| PrestoError::CrossOriginAsset {
            url: "https://cdn.other.com/logo.png".into(),
        });
        let rasterizer = Rasterizer::new(surface);

        let err = rasterizer.capture(&target()).await.unwrap_err();
        assert!(matches!(err, PrestoError::CrossOriginAsset { .. }));
        assert_eq!(
            rasterizer.surface().events(),
            vec!["hide", "render", "restore"]
        );
    }

    #[tokio::test]
    async fn stalled_render_times_out_and_restores_chrome() {
        let mut surface = FakeSurface::with_layout(100.0, 100.0);
        surface.stall = true;
        let rasterizer = Rasterizer::new(surface).with_timeout(Duration::from_millis(50));

        let err = rasterizer.capture(&target()).await.unwrap_err();
        assert!(matches!(err, PrestoError::CaptureTimeout(_)));
        assert_eq!(
            rasterizer.surface().events(),
            vec!["hide", "render", "restore"]
        );
    }

    #[tokio::test]
    async fn chrome_is_restored_when_body_panics() {
        let surface = FakeSurface::with_layout(10.0, 10.0);
        let node = surface.layout.clone().unwrap();
        let selectors = vec!["button".to_string()];

        let outcome = AssertUnwindSafe(with_hidden_chrome(&surface, &node, &selectors, || async {
            if selectors.len() == 1 {
                panic!("boom");
            }
            Ok(())
        }))
        .catch_unwind()
        .await;

        assert!(outcome.is_err());
        assert_eq!(surface.events(), vec!["hide", "restore"]);
    }

    #[tokio::test]
    async fn no_selectors_skips_chrome_toggling() {
        let surface = FakeSurface::with_layout(10.0, 10.0);
        let rasterizer = Rasterizer::new(surface);
        rasterizer
            .capture(&CaptureTarget::new("#doc"))
            .await
            .expect("capture");
        assert_eq!(rasterizer.surface().events(), vec!["render"]);
    }

    #[test]
    fn translucent_pixels_are_flattened() {
        let mut image = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0]));
        flatten_onto(&mut image, [255, 255, 255]);
        assert_eq!(image.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }
}
