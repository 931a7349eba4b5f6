use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ttyvid::compositor::LayerCompositor;
use ttyvid::layer::PixelLayer;
use ttyvid::overlay::{Overlay, WaveformOverlay};
use ttyvid::{ColorCapability, DitherChoice, DitherMode, DitherOverride, Frame};

fn call(mode: DitherMode, bits: u8) -> DitherOverride {
    DitherOverride {
        mode: Some(DitherChoice::Mode(mode)),
        bits: Some(bits),
    }
}

fn compositor_with_frame() -> LayerCompositor {
    let mut compositor = LayerCompositor::new(8, 6, ColorCapability::TrueColor);
    compositor.set_frame(Frame::solid(8, 6, [120, 60, 200, 255]));
    compositor
}

/// Draws a moving dot on every compose.
struct Ticker {
    draws: Arc<AtomicUsize>,
}

impl Overlay for Ticker {
    fn name(&self) -> &'static str {
        "ticker"
    }

    fn always_redraw(&self) -> bool {
        true
    }

    fn is_dirty(&self) -> bool {
        false
    }

    fn draw(&mut self, layer: &mut PixelLayer) {
        let n = self.draws.fetch_add(1, Ordering::SeqCst) as u32;
        layer.clear();
        layer.set_pixel(n % layer.width(), 0, [255, 255, 255, 255]);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[test]
fn unchanged_inputs_return_the_cached_buffer() {
    let mut compositor = compositor_with_frame();
    let settings = call(DitherMode::FloydSteinberg, 2);

    let first = compositor.compose(&settings);
    assert!(!first.from_cache);
    let first_ptr = first.pixels.as_ptr();
    let first_pixels = first.pixels.to_vec();

    let second = compositor.compose(&settings);
    assert!(second.from_cache);
    assert_eq!(second.pixels.as_ptr(), first_ptr);
    assert_eq!(second.pixels, first_pixels.as_slice());
}

#[test]
fn marking_dirty_forces_a_recompute() {
    let mut compositor = compositor_with_frame();
    let settings = call(DitherMode::Ordered, 3);
    compositor.compose(&settings);
    assert!(compositor.compose(&settings).from_cache);

    compositor.mark_dirty();
    assert!(!compositor.compose(&settings).from_cache);
    assert!(compositor.compose(&settings).from_cache);

    compositor.drawing_layer_mut().set_pixel(0, 0, [1, 2, 3, 255]);
    assert!(!compositor.compose(&settings).from_cache);
}

#[test]
fn new_dither_parameters_invalidate_the_cache() {
    let mut compositor = compositor_with_frame();
    compositor.compose(&call(DitherMode::Sierra, 2));
    assert!(!compositor.compose(&call(DitherMode::Sierra, 3)).from_cache);
    assert!(!compositor.compose(&call(DitherMode::Atkinson, 3)).from_cache);
    assert!(compositor.compose(&call(DitherMode::Atkinson, 3)).from_cache);
}

#[test]
fn always_redraw_overlays_bypass_the_cache() {
    let draws = Arc::new(AtomicUsize::new(0));
    let mut compositor = compositor_with_frame();
    compositor.add_overlay(Box::new(Ticker {
        draws: draws.clone(),
    }));
    let settings = call(DitherMode::None, 8);

    let first = compositor.compose(&settings).pixels.to_vec();
    let second = compositor.compose(&settings);
    assert!(!second.from_cache);
    assert_ne!(second.pixels, first.as_slice());
    assert_eq!(draws.load(Ordering::SeqCst), 2);

    assert!(compositor.remove_overlay("ticker"));
    compositor.compose(&settings);
    assert!(compositor.compose(&settings).from_cache);
}

#[test]
fn dirty_overlay_recomputes_once() {
    let mut compositor = compositor_with_frame();
    compositor.add_overlay(Box::new(WaveformOverlay::new(2)));
    let settings = call(DitherMode::None, 8);
    compositor.compose(&settings);
    assert!(compositor.compose(&settings).from_cache);

    compositor.set_waveform_peaks(&[1.0, 0.0]);
    let composite = compositor.compose(&settings);
    assert!(!composite.from_cache);
    // Left half of the bottom row carries the bar.
    let bottom = 5 * 8 * 4;
    assert_ne!(&composite.pixels[bottom..bottom + 4], &[120, 60, 200, 255]);
    assert_eq!(
        &composite.pixels[bottom + 7 * 4..bottom + 8 * 4],
        &[120, 60, 200, 255]
    );
    assert!(compositor.compose(&settings).from_cache);
}

#[test]
fn sixteen_color_default_posterizes_to_four_levels() {
    let mut compositor = LayerCompositor::new(8, 6, ColorCapability::Ansi16);
    compositor.set_frame(Frame::solid(8, 6, [120, 60, 200, 255]));
    let composite = compositor.compose(&DitherOverride::default());

    assert_eq!(composite.dither.mode, DitherMode::Posterize);
    assert_eq!(composite.dither.bits, 2);
    for px in composite.pixels.chunks_exact(4) {
        assert_eq!(px, &[85, 85, 170, 255]);
    }
}

#[test]
fn explicit_none_is_a_passthrough() {
    let mut compositor = LayerCompositor::new(8, 6, ColorCapability::Ansi16);
    compositor.set_frame(Frame::solid(8, 6, [120, 60, 200, 255]));
    let composite = compositor.compose(&call(DitherMode::None, 2));
    assert!(composite
        .pixels
        .chunks_exact(4)
        .all(|px| px == [120, 60, 200, 255]));
}
