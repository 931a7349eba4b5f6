//! Dithered video playback into color-constrained terminal surfaces.
//!
//! Frames come from an ffmpeg decoder process, are paced by
//! [`scheduler::FrameScheduler`], merged with a drawing layer and overlays by
//! [`compositor::LayerCompositor`], reduced with [`dither::Quantizer`] and
//! written into a [`surface::RenderSurface`]. [`player::Player`] runs all of it
//! on one tokio task together with optional audio sidecars and subtitles.

pub mod audio;
pub mod capability;
pub mod compositor;
pub mod config;
pub mod decoding;
pub mod dither;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod launcher;
pub mod layer;
pub mod overlay;
pub mod player;
pub mod process;
pub mod scheduler;
pub mod subtitle;
pub mod surface;
pub mod waveform;

pub use capability::{ColorCapability, DitherChoice, DitherOverride, DitherSettings};
pub use config::PlayerConfig;
pub use dither::{DitherMode, Quantizer};
pub use error::{PlaybackError, PlaybackResult};
pub use frame::Frame;
pub use launcher::{FfmpegLauncher, ProcessLauncher};
pub use player::{Player, PlayerCommand, PlayerEvent, PlayerHandle, PlayerState, PlaybackStatus};
pub use surface::{MemorySurface, RenderSurface};
