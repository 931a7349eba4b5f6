use std::any::Any;
use std::collections::HashMap;
use std::path::Path;

use fontdue::layout::{
    CoordinateSystem, GlyphRasterConfig, HorizontalAlign, Layout, LayoutSettings, TextStyle,
    VerticalAlign, WrapStyle,
};
use fontdue::{Font, FontSettings};

use crate::error::{PlaybackError, PlaybackResult};
use crate::layer::PixelLayer;

const WAVEFORM_COLOR: [u8; 4] = [80, 220, 120, 255];
const SUBTITLE_COLOR: [u8; 4] = [255, 255, 255, 255];
const SUBTITLE_MARGIN_PX: u32 = 2;
/// Glyph coverage at or above this counts as ink; surfaces have no partial alpha.
const GLYPH_INK_THRESHOLD: u8 = 128;

/// Something drawn into the drawing layer right before each merge.
pub trait Overlay: Send {
    fn name(&self) -> &'static str;

    /// Content changes every frame, so the composite cache is never reused.
    fn always_redraw(&self) -> bool {
        false
    }

    /// Content changed since the last [`draw`](Overlay::draw).
    fn is_dirty(&self) -> bool;

    fn draw(&mut self, layer: &mut PixelLayer);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Per-column peak bars along the bottom rows of the layer.
#[derive(Debug, Clone)]
pub struct WaveformOverlay {
    rows: u32,
    color: [u8; 4],
    peaks: Vec<f32>,
    dirty: bool,
}

impl WaveformOverlay {
    pub fn new(rows: u32) -> Self {
        Self {
            rows: rows.max(1),
            color: WAVEFORM_COLOR,
            peaks: Vec::new(),
            dirty: true,
        }
    }

    pub fn with_color(mut self, color: [u8; 4]) -> Self {
        self.color = color;
        self
    }

    pub fn set_peaks(&mut self, peaks: &[f32]) {
        self.peaks.clear();
        self.peaks.extend_from_slice(peaks);
        self.dirty = true;
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }
}

impl Overlay for WaveformOverlay {
    fn name(&self) -> &'static str {
        "waveform"
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn draw(&mut self, layer: &mut PixelLayer) {
        self.dirty = false;
        let (width, height) = (layer.width(), layer.height());
        let rows = self.rows.min(height);
        let top = height - rows;
        layer.clear_rect(0, top, width, rows);
        if self.peaks.is_empty() || width == 0 {
            return;
        }
        for x in 0..width {
            let column = x as usize * self.peaks.len() / width as usize;
            let peak = self.peaks[column].clamp(0.0, 1.0);
            let bar = ((peak * rows as f32).round() as u32).min(rows);
            if bar > 0 {
                layer.fill_rect(x, height - bar, 1, bar, self.color);
            }
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

struct GlyphBitmap {
    width: usize,
    height: usize,
    coverage: Vec<u8>,
}

/// Active subtitle cue, centered above the bottom edge.
pub struct SubtitleOverlay {
    font: Font,
    px: f32,
    color: [u8; 4],
    bottom_margin: u32,
    text: Option<String>,
    drawn: Option<Rect>,
    dirty: bool,
    glyph_cache: HashMap<GlyphRasterConfig, GlyphBitmap>,
}

impl SubtitleOverlay {
    pub fn new(font: Font, px: f32) -> Self {
        Self {
            font,
            px: px.max(4.0),
            color: SUBTITLE_COLOR,
            bottom_margin: SUBTITLE_MARGIN_PX,
            text: None,
            drawn: None,
            dirty: false,
            glyph_cache: HashMap::new(),
        }
    }

    pub fn from_path(path: &Path, px: f32) -> PlaybackResult<Self> {
        let bytes = std::fs::read(path)?;
        let font = Font::from_bytes(bytes, FontSettings::default()).map_err(|error| {
            PlaybackError::config(format!("failed to parse font {}: {error}", path.display()))
        })?;
        Ok(Self::new(font, px))
    }

    /// Keep text clear of rows used by another bottom overlay.
    pub fn with_bottom_margin(mut self, rows: u32) -> Self {
        self.bottom_margin = rows + SUBTITLE_MARGIN_PX;
        self
    }

    pub fn set_text(&mut self, text: Option<&str>) {
        let text = text.filter(|t| !t.trim().is_empty()).map(str::to_owned);
        if text != self.text {
            self.text = text;
            self.dirty = true;
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

impl Overlay for SubtitleOverlay {
    fn name(&self) -> &'static str {
        "subtitles"
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn draw(&mut self, layer: &mut PixelLayer) {
        self.dirty = false;
        if let Some(rect) = self.drawn.take() {
            layer.clear_rect(rect.x, rect.y, rect.width, rect.height);
        }
        let Some(text) = self.text.as_deref() else {
            return;
        };
        let (width, height) = (layer.width(), layer.height());
        if width == 0 || height == 0 {
            return;
        }

        let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
        layout.reset(&LayoutSettings {
            x: 0.0,
            y: 0.0,
            max_width: Some(width as f32),
            max_height: None,
            horizontal_align: HorizontalAlign::Center,
            vertical_align: VerticalAlign::Top,
            line_height: 1.0,
            wrap_style: WrapStyle::Word,
            wrap_hard_breaks: true,
        });
        layout.append(&[&self.font], &TextStyle::new(text, self.px, 0));
        let text_height = layout.height().ceil() as i64;
        let offset_y = i64::from(height) - i64::from(self.bottom_margin) - text_height;

        let mut min = (u32::MAX, u32::MAX);
        let mut max = (0_u32, 0_u32);
        for glyph in layout.glyphs() {
            if glyph.width == 0 || glyph.height == 0 {
                continue;
            }
            let font = &self.font;
            let bitmap = self.glyph_cache.entry(glyph.key).or_insert_with(|| {
                let (metrics, coverage) = font.rasterize_config(glyph.key);
                GlyphBitmap {
                    width: metrics.width,
                    height: metrics.height,
                    coverage,
                }
            });
            let origin_x = glyph.x.round() as i64;
            let origin_y = glyph.y.round() as i64 + offset_y;
            for row in 0..bitmap.height {
                let y = origin_y + row as i64;
                if y < 0 || y >= i64::from(height) {
                    continue;
                }
                for col in 0..bitmap.width {
                    let x = origin_x + col as i64;
                    if x < 0 || x >= i64::from(width) {
                        continue;
                    }
                    if bitmap.coverage[row * bitmap.width + col] < GLYPH_INK_THRESHOLD {
                        continue;
                    }
                    let (x, y) = (x as u32, y as u32);
                    layer.set_pixel(x, y, self.color);
                    min = (min.0.min(x), min.1.min(y));
                    max = (max.0.max(x), max.1.max(y));
                }
            }
        }
        if min.0 <= max.0 && min.1 <= max.1 {
            self.drawn = Some(Rect {
                x: min.0,
                y: min.1,
                width: max.0 - min.0 + 1,
                height: max.1 - min.1 + 1,
            });
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
