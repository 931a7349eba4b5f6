//! Layer merge, overlay pass, dithering and the composite cache.

use crate::capability::{resolve_dither, ColorCapability, DitherOverride, DitherSettings};
use crate::dither::{DitherMode, Quantizer};
use crate::error::PlaybackError;
use crate::frame::Frame;
use crate::geometry::centered_origin;
use crate::layer::PixelLayer;
use crate::overlay::{Overlay, SubtitleOverlay, WaveformOverlay};
use crate::surface::{pack_rgba, RenderSurface};

const TRANSPARENT: [u8; 4] = [0; 4];

/// Result of one [`LayerCompositor::compose`] call.
#[derive(Debug)]
pub struct Composite<'a> {
    pub pixels: &'a [u8],
    /// The cached buffer was returned without recomputation.
    pub from_cache: bool,
    pub dither: DitherSettings,
}

#[derive(Debug, Default)]
struct CompositeCache {
    pixels: Vec<u8>,
    valid: bool,
    last: Option<DitherSettings>,
}

pub struct LayerCompositor {
    width: u32,
    height: u32,
    drawing: PixelLayer,
    frame: Option<Frame>,
    frame_origin: (u32, u32),
    background: Option<[u8; 4]>,
    overlays: Vec<Box<dyn Overlay>>,
    quantizer: Quantizer,
    config_dither: DitherOverride,
    capability: ColorCapability,
    cache: CompositeCache,
    content_dirty: bool,
}

impl LayerCompositor {
    pub fn new(width: u32, height: u32, capability: ColorCapability) -> Self {
        Self {
            width,
            height,
            drawing: PixelLayer::new(width, height),
            frame: None,
            frame_origin: (0, 0),
            background: None,
            overlays: Vec::new(),
            quantizer: Quantizer::new(),
            config_dither: DitherOverride::default(),
            capability,
            cache: CompositeCache::default(),
            content_dirty: true,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn set_background(&mut self, background: Option<[u8; 4]>) {
        if self.background != background {
            self.background = background;
            self.content_dirty = true;
        }
    }

    pub fn set_config_dither(&mut self, config: DitherOverride) {
        self.config_dither = config;
    }

    pub fn config_dither(&self) -> DitherOverride {
        self.config_dither
    }

    pub fn set_capability(&mut self, capability: ColorCapability) {
        self.capability = capability;
    }

    pub fn capability(&self) -> ColorCapability {
        self.capability
    }

    /// Dither parameters a call with `call` overrides would use right now.
    pub fn resolve(&self, call: &DitherOverride) -> DitherSettings {
        resolve_dither(call, &self.config_dither, self.capability)
    }

    pub fn add_overlay(&mut self, overlay: Box<dyn Overlay>) {
        self.overlays.push(overlay);
        self.content_dirty = true;
    }

    pub fn remove_overlay(&mut self, name: &str) -> bool {
        let before = self.overlays.len();
        self.overlays.retain(|overlay| overlay.name() != name);
        let removed = self.overlays.len() != before;
        if removed {
            // Removed overlays leave their pixels behind in the drawing layer.
            self.drawing.clear();
            self.content_dirty = true;
        }
        removed
    }

    pub fn has_overlay(&self, name: &str) -> bool {
        self.overlays.iter().any(|overlay| overlay.name() == name)
    }

    fn overlay_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.overlays
            .iter_mut()
            .find_map(|overlay| overlay.as_any_mut().downcast_mut::<T>())
    }

    pub fn set_waveform_peaks(&mut self, peaks: &[f32]) {
        if let Some(waveform) = self.overlay_mut::<WaveformOverlay>() {
            waveform.set_peaks(peaks);
        }
    }

    pub fn set_subtitle_text(&mut self, text: Option<&str>) {
        if let Some(subtitles) = self.overlay_mut::<SubtitleOverlay>() {
            subtitles.set_text(text);
        }
    }

    /// Mutable drawing layer; marks the composite dirty.
    pub fn drawing_layer_mut(&mut self) -> &mut PixelLayer {
        self.content_dirty = true;
        &mut self.drawing
    }

    pub fn drawing_layer(&self) -> &PixelLayer {
        &self.drawing
    }

    pub fn mark_dirty(&mut self) {
        self.content_dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.content_dirty
    }

    /// Install `frame` as the frame layer, centered. Returns a buffer to recycle:
    /// the previous frame's, or `frame`'s own when it does not fit.
    pub fn set_frame(&mut self, frame: Frame) -> Option<Vec<u8>> {
        if frame.width() > self.width || frame.height() > self.height {
            let error = PlaybackError::BufferSizeMismatch {
                width: self.width,
                height: self.height,
                expected: Frame::expected_len(self.width, self.height),
                actual: frame.data().len(),
            };
            tracing::warn!(
                code = error.code(),
                frame_width = frame.width(),
                frame_height = frame.height(),
                "{error}; frame dropped"
            );
            return Some(frame.into_data());
        }
        self.frame_origin = centered_origin(
            (self.width, self.height),
            (frame.width(), frame.height()),
        );
        self.content_dirty = true;
        self.frame.replace(frame).map(Frame::into_data)
    }

    pub fn clear_frame(&mut self) -> Option<Vec<u8>> {
        self.content_dirty = true;
        self.frame.take().map(Frame::into_data)
    }

    pub fn frame_origin(&self) -> (u32, u32) {
        self.frame_origin
    }

    /// Resize every layer. The frame layer and drawing layer are cleared.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.drawing.resize(width, height);
        self.frame = None;
        self.frame_origin = (0, 0);
        self.cache.valid = false;
        self.content_dirty = true;
        for overlay in &mut self.overlays {
            if let Some(waveform) = overlay.as_any_mut().downcast_mut::<WaveformOverlay>() {
                waveform.set_peaks(&[]);
            }
        }
    }

    /// Merge, run overlays and dither into the cache buffer, or return the cache
    /// untouched when nothing that feeds it has changed.
    pub fn compose(&mut self, call: &DitherOverride) -> Composite<'_> {
        let dither = self.resolve(call);
        let always = self.overlays.iter().any(|overlay| overlay.always_redraw());
        let overlay_dirty = self.overlays.iter().any(|overlay| overlay.is_dirty());
        let reusable = self.cache.valid
            && !self.content_dirty
            && !always
            && !overlay_dirty
            && self.cache.last == Some(dither);
        if reusable {
            return Composite {
                pixels: &self.cache.pixels,
                from_cache: true,
                dither,
            };
        }

        for overlay in &mut self.overlays {
            if overlay.always_redraw() || overlay.is_dirty() {
                overlay.draw(&mut self.drawing);
            }
        }
        self.merge();
        if dither.mode != DitherMode::None {
            self.quantizer.apply(
                &mut self.cache.pixels,
                self.width,
                self.height,
                dither.bits,
                dither.mode,
            );
        }
        self.cache.valid = true;
        self.cache.last = Some(dither);
        self.content_dirty = false;
        Composite {
            pixels: &self.cache.pixels,
            from_cache: false,
            dither,
        }
    }

    fn merge(&mut self) {
        let width = self.width as usize;
        let height = self.height as usize;
        let len = width * height * 4;
        self.cache.pixels.resize(len, 0);

        let fill = self.background.unwrap_or(TRANSPARENT);
        let drawing = self.drawing.data();
        let (origin_x, origin_y) = (self.frame_origin.0 as usize, self.frame_origin.1 as usize);
        let frame = self.frame.as_ref();

        for y in 0..height {
            for x in 0..width {
                let idx = (y * width + x) * 4;
                let out = &mut self.cache.pixels[idx..idx + 4];
                if drawing[idx + 3] != 0 {
                    out.copy_from_slice(&drawing[idx..idx + 4]);
                    continue;
                }
                let framed = frame.and_then(|frame| {
                    let fx = x.checked_sub(origin_x)?;
                    let fy = y.checked_sub(origin_y)?;
                    if fx >= frame.width() as usize || fy >= frame.height() as usize {
                        return None;
                    }
                    let fidx = (fy * frame.width() as usize + fx) * 4;
                    let px = &frame.data()[fidx..fidx + 4];
                    (px[3] != 0).then_some(px)
                });
                match framed {
                    Some(px) => out.copy_from_slice(px),
                    None => out.copy_from_slice(&fill),
                }
            }
        }
    }

    /// Compose and write the result into `surface`, then request a repaint.
    pub fn present<S: RenderSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        call: &DitherOverride,
    ) -> DitherSettings {
        let (width, height) = surface.pixel_size();
        if (width, height) != (self.width, self.height) {
            tracing::debug!(width, height, "surface size changed, resizing layers");
            self.resize(width, height);
        }
        let composite = self.compose(call);
        let dither = composite.dither;
        let target = surface.image_color_buffer_mut();
        if target.len() != composite.pixels.len() / 4 {
            let error = PlaybackError::BufferSizeMismatch {
                width,
                height,
                expected: composite.pixels.len() / 4,
                actual: target.len(),
            };
            tracing::warn!(code = error.code(), "{error}");
        }
        for (word, px) in target.iter_mut().zip(composite.pixels.chunks_exact(4)) {
            *word = pack_rgba([px[0], px[1], px[2], px[3]]);
        }
        surface.mark_dirty();
        surface.request_render();
        dither
    }
}
