use serde::Serialize;

/// Width alignment of decoder output, in pixels.
pub const WIDTH_ALIGN: u32 = 16;
/// Height alignment of decoder output; one terminal cell carries a 3-row sub-grid.
pub const HEIGHT_ALIGN: u32 = 3;
pub const MIN_OUTPUT_WIDTH: u32 = 16;
pub const MIN_OUTPUT_HEIGHT: u32 = 48;
/// Used when the source cannot be probed or reports a zero dimension.
pub const DEFAULT_SOURCE_DIMENSIONS: (u32, u32) = (640, 480);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputDimensions {
    pub width: u32,
    pub height: u32,
}

impl OutputDimensions {
    pub fn frame_len(self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Decoder output size for a `src_w`×`src_h` source shown in a `buf_w`×`buf_h`
/// pixel buffer whose pixels are `pixel_aspect` times as wide as they are tall.
///
/// The source is fitted into the largest 16×3-aligned box strictly inside the
/// buffer. The limiting axis is aligned down first and the other axis derived
/// from it, so the displayed aspect stays within one alignment unit of the
/// source. The 16×48 minimum is applied last, and the strict clamp overrides it.
/// Buffers too small to hold one alignment unit get exactly one unit.
pub fn compute_output_dimensions(
    src_w: u32,
    src_h: u32,
    buf_w: u32,
    buf_h: u32,
    pixel_aspect: f64,
) -> OutputDimensions {
    let (src_w, src_h) = if src_w == 0 || src_h == 0 {
        DEFAULT_SOURCE_DIMENSIONS
    } else {
        (src_w, src_h)
    };
    let pixel_aspect = if pixel_aspect.is_finite() && pixel_aspect > 0.0 {
        pixel_aspect
    } else {
        1.0
    };
    // Output pixels per output row that keep the source shape on screen.
    let shape = f64::from(src_w) / f64::from(src_h) / pixel_aspect;

    let max_w = largest_below(buf_w, WIDTH_ALIGN);
    let max_h = largest_below(buf_h, HEIGHT_ALIGN);
    let (width, height) = if f64::from(max_w) / shape <= f64::from(max_h) {
        let height = align_down(f64::from(max_w) / shape, HEIGHT_ALIGN);
        (max_w, height)
    } else {
        let width = align_down(f64::from(max_h) * shape, WIDTH_ALIGN);
        (width, max_h)
    };

    OutputDimensions {
        width: clamp_below(width.max(MIN_OUTPUT_WIDTH), buf_w, WIDTH_ALIGN),
        height: clamp_below(height.max(MIN_OUTPUT_HEIGHT), buf_h, HEIGHT_ALIGN),
    }
}

fn align_down(value: f64, unit: u32) -> u32 {
    let units = (value / f64::from(unit)).floor().max(0.0);
    (units as u32).saturating_mul(unit)
}

/// Largest multiple of `unit` strictly below `bound`, or one unit.
fn largest_below(bound: u32, unit: u32) -> u32 {
    let stepped = bound.saturating_sub(1) / unit * unit;
    if stepped == 0 {
        unit
    } else {
        stepped
    }
}

fn clamp_below(value: u32, bound: u32, unit: u32) -> u32 {
    if value < bound {
        value
    } else {
        largest_below(bound, unit)
    }
}

/// Top-left corner that centers an `inner` rectangle in an `outer` one.
pub fn centered_origin(outer: (u32, u32), inner: (u32, u32)) -> (u32, u32) {
    (
        outer.0.saturating_sub(inner.0) / 2,
        outer.1.saturating_sub(inner.1) / 2,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_source_in_small_terminal_buffer() {
        let dims = compute_output_dimensions(1920, 1080, 80, 24, 0.5);
        assert_eq!(dims, OutputDimensions { width: 64, height: 21 });
        assert_eq!(dims.width % WIDTH_ALIGN, 0);
        assert_eq!(dims.height % HEIGHT_ALIGN, 0);
    }

    #[test]
    fn roomy_buffer_keeps_aspect() {
        let dims = compute_output_dimensions(640, 480, 1000, 1000, 1.0);
        assert_eq!(dims, OutputDimensions { width: 992, height: 744 });
        let dims = compute_output_dimensions(1920, 1080, 160, 120, 1.0);
        assert_eq!(dims, OutputDimensions { width: 144, height: 81 });
    }

    #[test]
    fn displayed_shape_stays_within_one_alignment_unit() {
        let cases = [
            ((1920, 1080), (320, 200), 1.0),
            ((1920, 1080), (160, 120), 1.0),
            ((1920, 1080), (400, 300), 0.5),
            ((640, 480), (1000, 1000), 1.0),
            ((640, 480), (333, 301), 1.0),
            ((480, 960), (400, 300), 1.0),
            ((64, 48), (160, 120), 1.0),
            ((64, 48), (200, 100), 1.0),
            ((1280, 544), (500, 500), 2.0),
        ];
        for ((src_w, src_h), (buf_w, buf_h), pixel_aspect) in cases {
            let dims = compute_output_dimensions(src_w, src_h, buf_w, buf_h, pixel_aspect);
            assert!(dims.width < buf_w && dims.height < buf_h, "{dims:?} escapes the buffer");
            assert!(dims.height >= MIN_OUTPUT_HEIGHT, "{dims:?} hit the minimum");

            let shape = f64::from(src_w) / f64::from(src_h) / pixel_aspect;
            let width_gap = (f64::from(dims.width) - f64::from(dims.height) * shape).abs();
            let height_gap = (f64::from(dims.height) - f64::from(dims.width) / shape).abs();
            assert!(
                width_gap < f64::from(WIDTH_ALIGN) || height_gap < f64::from(HEIGHT_ALIGN),
                "{src_w}x{src_h} in {buf_w}x{buf_h} became {dims:?}"
            );
        }
    }

    #[test]
    fn tall_source_fits_by_height() {
        let dims = compute_output_dimensions(480, 960, 400, 300, 1.0);
        assert_eq!(dims.height, 297);
        assert_eq!(dims.width, 144);
    }

    #[test]
    fn degenerate_buffers_yield_one_unit() {
        let dims = compute_output_dimensions(1920, 1080, 8, 2, 1.0);
        assert_eq!(dims, OutputDimensions { width: 16, height: 3 });
    }

    #[test]
    fn zero_source_uses_default() {
        let zero = compute_output_dimensions(0, 0, 320, 320, 1.0);
        let default = compute_output_dimensions(640, 480, 320, 320, 1.0);
        assert_eq!(zero, default);
    }

    #[test]
    fn centering_saturates() {
        assert_eq!(centered_origin((100, 50), (60, 30)), (20, 10));
        assert_eq!(centered_origin((10, 10), (20, 20)), (0, 0));
    }
}
