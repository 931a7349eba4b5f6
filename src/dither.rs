//! Color-depth reduction with ordered and error-diffusion dithering.
//!
//! All modes operate in place on RGBA8 buffers and leave alpha untouched:
//!
//! 1. **1-bit**, shared by every mode: BT.601 luminance thresholded at 128,
//!    written to all three color channels.
//! 2. **Error diffusion**: Floyd-Steinberg, Sierra (two-row) and Atkinson, each
//!    with a `-stable` variant whose lower-row weights are halved to reduce
//!    frame-to-frame shimmer. Pixels are visited strictly left to right, top to
//!    bottom.
//! 3. **Threshold maps**: 8×8 Bayer and a 64×64 blue-noise map. Output depends
//!    only on position and the pixel's own value.
//! 4. **Posterize**: each channel snapped to its nearest level, no spatial dithering.
//!
//! Output is a pure function of `(input, width, height, bits, mode)`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PlaybackError;

pub const MIN_BITS: u8 = 1;
pub const MAX_BITS: u8 = 8;

const LUMA_R_WEIGHT: u32 = 299;
const LUMA_G_WEIGHT: u32 = 587;
const LUMA_B_WEIGHT: u32 = 114;
const LUMA_WEIGHT_SUM: u32 = 1000;
const LUMA_THRESHOLD: u32 = 128;

/// Multiplier applied to every lower-row weight of a `-stable` kernel.
const STABLE_FALLOFF: f32 = 0.5;

/// Deepest row offset of any kernel; sizes the error-row ring.
const MAX_KERNEL_REACH: usize = 2;

const BAYER_8X8: [[u8; 8]; 8] = [
    [0, 32, 8, 40, 2, 34, 10, 42],
    [48, 16, 56, 24, 50, 18, 58, 26],
    [12, 44, 4, 36, 14, 46, 6, 38],
    [60, 28, 52, 20, 62, 30, 54, 22],
    [3, 35, 11, 43, 1, 33, 9, 41],
    [51, 19, 59, 27, 49, 17, 57, 25],
    [15, 47, 7, 39, 13, 45, 5, 37],
    [63, 31, 55, 23, 61, 29, 53, 21],
];

const BLUE_NOISE_SIZE: usize = 64;
/// Void-and-cluster ranks scaled to 0..=255, row-major.
static BLUE_NOISE_64X64: &[u8; BLUE_NOISE_SIZE * BLUE_NOISE_SIZE] =
    include_bytes!("../assets/blue_noise_64x64.bin");

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

/// Error-diffusion weights as `(dx, dy, weight)` taps relative to the current pixel.
///
/// Weights are used exactly as listed; they are not normalized.
#[derive(Debug, PartialEq)]
pub struct DitherKernel {
    pub taps: &'static [(i32, usize, f32)],
    pub max_reach: usize,
    pub padding: usize,
}

impl DitherKernel {
    pub fn total_weight(&self) -> f32 {
        self.taps.iter().map(|&(_, _, weight)| weight).sum()
    }
}

pub static FLOYD_STEINBERG: DitherKernel = DitherKernel {
    taps: &[
        (1, 0, 7.0 / 16.0),
        (-1, 1, 3.0 / 16.0),
        (0, 1, 5.0 / 16.0),
        (1, 1, 1.0 / 16.0),
    ],
    max_reach: 1,
    padding: 1,
};

pub static FLOYD_STEINBERG_STABLE: DitherKernel = DitherKernel {
    taps: &[
        (1, 0, 7.0 / 16.0),
        (-1, 1, 3.0 / 16.0 * STABLE_FALLOFF),
        (0, 1, 5.0 / 16.0 * STABLE_FALLOFF),
        (1, 1, 1.0 / 16.0 * STABLE_FALLOFF),
    ],
    max_reach: 1,
    padding: 1,
};

pub static SIERRA: DitherKernel = DitherKernel {
    taps: &[
        (1, 0, 4.0 / 16.0),
        (2, 0, 3.0 / 16.0),
        (-2, 1, 1.0 / 16.0),
        (-1, 1, 2.0 / 16.0),
        (0, 1, 3.0 / 16.0),
        (1, 1, 2.0 / 16.0),
        (2, 1, 1.0 / 16.0),
    ],
    max_reach: 1,
    padding: 2,
};

pub static SIERRA_STABLE: DitherKernel = DitherKernel {
    taps: &[
        (1, 0, 4.0 / 16.0),
        (2, 0, 3.0 / 16.0),
        (-2, 1, 1.0 / 16.0 * STABLE_FALLOFF),
        (-1, 1, 2.0 / 16.0 * STABLE_FALLOFF),
        (0, 1, 3.0 / 16.0 * STABLE_FALLOFF),
        (1, 1, 2.0 / 16.0 * STABLE_FALLOFF),
        (2, 1, 1.0 / 16.0 * STABLE_FALLOFF),
    ],
    max_reach: 1,
    padding: 2,
};

// Six eighths in total. The remaining quarter of the residual is dropped on purpose.
pub static ATKINSON: DitherKernel = DitherKernel {
    taps: &[
        (1, 0, 1.0 / 8.0),
        (2, 0, 1.0 / 8.0),
        (-1, 1, 1.0 / 8.0),
        (0, 1, 1.0 / 8.0),
        (1, 1, 1.0 / 8.0),
        (0, 2, 1.0 / 8.0),
    ],
    max_reach: 2,
    padding: 2,
};

pub static ATKINSON_STABLE: DitherKernel = DitherKernel {
    taps: &[
        (1, 0, 1.0 / 8.0),
        (2, 0, 1.0 / 8.0),
        (-1, 1, 1.0 / 8.0 * STABLE_FALLOFF),
        (0, 1, 1.0 / 8.0 * STABLE_FALLOFF),
        (1, 1, 1.0 / 8.0 * STABLE_FALLOFF),
        (0, 2, 1.0 / 8.0 * STABLE_FALLOFF),
    ],
    max_reach: 2,
    padding: 2,
};

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DitherMode {
    /// Passthrough.
    #[default]
    None,
    FloydSteinberg,
    FloydSteinbergStable,
    Sierra,
    SierraStable,
    Atkinson,
    AtkinsonStable,
    Ordered,
    BlueNoise,
    /// Nearest level per channel, no spatial dithering.
    Posterize,
}

impl DitherMode {
    pub const ALL: [DitherMode; 10] = [
        Self::None,
        Self::FloydSteinberg,
        Self::FloydSteinbergStable,
        Self::Sierra,
        Self::SierraStable,
        Self::Atkinson,
        Self::AtkinsonStable,
        Self::Ordered,
        Self::BlueNoise,
        Self::Posterize,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::FloydSteinberg => "floyd-steinberg",
            Self::FloydSteinbergStable => "floyd-steinberg-stable",
            Self::Sierra => "sierra",
            Self::SierraStable => "sierra-stable",
            Self::Atkinson => "atkinson",
            Self::AtkinsonStable => "atkinson-stable",
            Self::Ordered => "ordered",
            Self::BlueNoise => "blue-noise",
            Self::Posterize => "posterize",
        }
    }

    pub fn from_keyword(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|mode| mode.keyword() == normalized)
    }

    /// Diffusion kernel for error-diffusion modes, `None` for the rest.
    pub fn kernel(self) -> Option<&'static DitherKernel> {
        match self {
            Self::FloydSteinberg => Some(&FLOYD_STEINBERG),
            Self::FloydSteinbergStable => Some(&FLOYD_STEINBERG_STABLE),
            Self::Sierra => Some(&SIERRA),
            Self::SierraStable => Some(&SIERRA_STABLE),
            Self::Atkinson => Some(&ATKINSON),
            Self::AtkinsonStable => Some(&ATKINSON_STABLE),
            Self::None | Self::Ordered | Self::BlueNoise | Self::Posterize => None,
        }
    }

    pub fn is_stable(self) -> bool {
        matches!(
            self,
            Self::FloydSteinbergStable | Self::SierraStable | Self::AtkinsonStable
        )
    }
}

impl fmt::Display for DitherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for DitherMode {
    type Err = PlaybackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_keyword(s).ok_or_else(|| {
            let allowed = Self::ALL.map(Self::keyword).join(", ");
            PlaybackError::config(format!("unknown dither mode '{s}' (expected one of: {allowed})"))
        })
    }
}

// ---------------------------------------------------------------------------
// Level math
// ---------------------------------------------------------------------------

/// Clamp a requested depth into `1..=8`. Out-of-range values are logged, never rejected.
pub fn clamp_bits(bits: u8) -> u8 {
    let clamped = bits.clamp(MIN_BITS, MAX_BITS);
    if clamped != bits {
        let error = PlaybackError::DitherParameter {
            requested: bits,
            clamped,
        };
        tracing::debug!(code = error.code(), "{error}");
    }
    clamped
}

#[derive(Debug, Clone, Copy)]
struct Levels {
    step: f32,
}

impl Levels {
    fn new(bits: u8) -> Self {
        let levels = 1_u32 << bits;
        Self {
            step: 255.0 / (levels - 1) as f32,
        }
    }

    fn quantize(self, value: f32) -> u8 {
        let value = value.clamp(0.0, 255.0);
        ((value / self.step).round() * self.step).round().min(255.0) as u8
    }
}

/// Quantize one channel value to `2^bits` evenly spaced levels.
pub fn quantize_channel(value: u8, bits: u8) -> u8 {
    Levels::new(clamp_bits(bits)).quantize(f32::from(value))
}

fn luma_is_light(r: u8, g: u8, b: u8) -> bool {
    let weighted =
        LUMA_R_WEIGHT * u32::from(r) + LUMA_G_WEIGHT * u32::from(g) + LUMA_B_WEIGHT * u32::from(b);
    weighted >= LUMA_THRESHOLD * LUMA_WEIGHT_SUM
}

fn bayer_threshold(x: usize, y: usize) -> f32 {
    (f32::from(BAYER_8X8[y & 7][x & 7]) + 0.5) / 64.0
}

fn blue_noise_threshold(x: usize, y: usize) -> f32 {
    let idx = (y % BLUE_NOISE_SIZE) * BLUE_NOISE_SIZE + (x % BLUE_NOISE_SIZE);
    (f32::from(BLUE_NOISE_64X64[idx]) + 0.5) / 256.0
}

// ---------------------------------------------------------------------------
// Scratch
// ---------------------------------------------------------------------------

/// Per-channel error rows for diffusion, kept as a ring of `MAX_KERNEL_REACH + 1`
/// rows of `width + 2 * padding` cells. Grows on demand and never shrinks.
#[derive(Debug, Default)]
pub struct ErrorBuffers {
    stride: usize,
    channels: [Vec<f32>; 3],
}

impl ErrorBuffers {
    const ROWS: usize = MAX_KERNEL_REACH + 1;

    fn prepare(&mut self, width: usize, padding: usize) {
        let stride = width + 2 * padding;
        if stride > self.stride {
            for channel in &mut self.channels {
                channel.resize(stride * Self::ROWS, 0.0);
            }
            self.stride = stride;
        }
        for channel in &mut self.channels {
            channel.fill(0.0);
        }
    }

    fn clear_row(&mut self, slot: usize) {
        let start = slot * self.stride;
        let end = start + self.stride;
        for channel in &mut self.channels {
            channel[start..end].fill(0.0);
        }
    }

    /// Cells allocated per channel.
    pub fn capacity(&self) -> usize {
        self.channels[0].len()
    }
}

// ---------------------------------------------------------------------------
// Quantizer
// ---------------------------------------------------------------------------

/// Applies a [`DitherMode`] to RGBA buffers, reusing its [`ErrorBuffers`]
/// across calls. Keep one per playback session.
#[derive(Debug, Default)]
pub struct Quantizer {
    errors: ErrorBuffers,
}

impl Quantizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scratch(&self) -> &ErrorBuffers {
        &self.errors
    }

    /// Reduce `rgba` in place. Buffers shorter than `width * height * 4` are left
    /// untouched.
    pub fn apply(&mut self, rgba: &mut [u8], width: u32, height: u32, bits: u8, mode: DitherMode) {
        let width = width as usize;
        let height = height as usize;
        let pixel_count = width * height;
        if pixel_count == 0 {
            return;
        }
        if rgba.len() < pixel_count * 4 {
            let error = PlaybackError::BufferSizeMismatch {
                width: width as u32,
                height: height as u32,
                expected: pixel_count * 4,
                actual: rgba.len(),
            };
            tracing::warn!(code = error.code(), "{error}");
            return;
        }
        let bits = clamp_bits(bits);
        let rgba = &mut rgba[..pixel_count * 4];

        if mode == DitherMode::None {
            return;
        }
        if bits == 1 {
            threshold_luma(rgba);
            return;
        }

        let levels = Levels::new(bits);
        match mode {
            DitherMode::None => {}
            DitherMode::Ordered => apply_threshold_map(rgba, width, levels, bayer_threshold),
            DitherMode::BlueNoise => {
                apply_threshold_map(rgba, width, levels, blue_noise_threshold)
            }
            DitherMode::Posterize => posterize(rgba, levels),
            DitherMode::FloydSteinberg
            | DitherMode::FloydSteinbergStable
            | DitherMode::Sierra
            | DitherMode::SierraStable
            | DitherMode::Atkinson
            | DitherMode::AtkinsonStable => {
                if let Some(kernel) = mode.kernel() {
                    self.diffuse(rgba, width, height, levels, kernel);
                }
            }
        }
    }

    fn diffuse(
        &mut self,
        rgba: &mut [u8],
        width: usize,
        height: usize,
        levels: Levels,
        kernel: &DitherKernel,
    ) {
        debug_assert!(kernel.max_reach <= MAX_KERNEL_REACH);
        self.errors.prepare(width, kernel.padding);
        let stride = self.errors.stride;
        let rows = ErrorBuffers::ROWS;

        for y in 0..height {
            let slot = y % rows;
            for x in 0..width {
                let px = (y * width + x) * 4;
                let col = x + kernel.padding;
                for (channel, errors) in self.errors.channels.iter_mut().enumerate() {
                    let value = f32::from(rgba[px + channel]) + errors[slot * stride + col];
                    let quantized = levels.quantize(value);
                    rgba[px + channel] = quantized;

                    let residual = value - f32::from(quantized);
                    if residual == 0.0 {
                        continue;
                    }
                    for &(dx, dy, weight) in kernel.taps {
                        if y + dy >= height {
                            continue;
                        }
                        let target_col = (col as isize + dx as isize) as usize;
                        let target_slot = (y + dy) % rows;
                        errors[target_slot * stride + target_col] += residual * weight;
                    }
                }
            }
            self.errors.clear_row(slot);
        }
    }
}

fn posterize(rgba: &mut [u8], levels: Levels) {
    for px in rgba.chunks_exact_mut(4) {
        for value in &mut px[..3] {
            *value = levels.quantize(f32::from(*value));
        }
    }
}

fn threshold_luma(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let value = if luma_is_light(px[0], px[1], px[2]) {
            255
        } else {
            0
        };
        px[0] = value;
        px[1] = value;
        px[2] = value;
    }
}

fn apply_threshold_map(
    rgba: &mut [u8],
    width: usize,
    levels: Levels,
    threshold: fn(usize, usize) -> f32,
) {
    for (idx, px) in rgba.chunks_exact_mut(4).enumerate() {
        let x = idx % width;
        let y = idx / width;
        let offset = (threshold(x, y) - 0.5) * levels.step;
        for value in &mut px[..3] {
            *value = levels.quantize(f32::from(*value) + offset);
        }
    }
}
