//! Player configuration: YAML file, then `TTYVID_*` environment, then CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::capability::{DitherChoice, DitherOverride};
use crate::error::{PlaybackError, PlaybackResult};

pub const ENV_DITHER: &str = "TTYVID_DITHER";
pub const ENV_BITS: &str = "TTYVID_BITS";
pub const ENV_FFMPEG: &str = "TTYVID_FFMPEG";
pub const ENV_FFPROBE: &str = "TTYVID_FFPROBE";
pub const ENV_FFPLAY: &str = "TTYVID_FFPLAY";
pub const ENV_LOOP: &str = "TTYVID_LOOP";

const MAX_FPS: f64 = 240.0;

/// Resolve a boolean override from CLI and env. CLI wins over env.
/// Returns None when neither gives a usable value.
pub fn resolve_bool_override(cli_arg: Option<bool>, env_var: Option<String>) -> Option<bool> {
    if cli_arg.is_some() {
        return cli_arg;
    }
    match env_var.as_deref().map(str::trim) {
        Some("1") | Some("on") | Some("true") | Some("yes") => Some(true),
        Some("0") | Some("off") | Some("false") | Some("no") => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPaths {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub ffplay: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_owned(),
            ffprobe: "ffprobe".to_owned(),
            ffplay: "ffplay".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AudioConfig {
    /// Run the audible player sidecar.
    pub playback: bool,
    /// Run the sample extractor and draw the waveform overlay.
    pub waveform: bool,
    pub volume: u8,
    pub sample_rate: u32,
    pub window_ms: u32,
    pub waveform_rows: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            playback: true,
            waveform: false,
            volume: 100,
            sample_rate: 8000,
            window_ms: 100,
            waveform_rows: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubtitleConfig {
    pub path: Option<PathBuf>,
    /// TTF/OTF used to draw cues. Without one, cues are only reported as events.
    pub font: Option<PathBuf>,
    pub font_px: f32,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            path: None,
            font: None,
            font_px: 12.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlayerConfig {
    pub tools: ToolPaths,
    pub fps: f64,
    #[serde(rename = "loop")]
    pub loop_playback: bool,
    /// Display width of one surface pixel divided by its height.
    pub pixel_aspect_ratio: f64,
    /// RGBA shown where neither the drawing nor the frame layer has content.
    pub background: Option<[u8; 4]>,
    pub dither: DitherOverride,
    pub audio: AudioConfig,
    pub subtitles: SubtitleConfig,
    pub stop_grace_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            fps: 30.0,
            loop_playback: false,
            pixel_aspect_ratio: 1.0,
            background: None,
            dither: DitherOverride::default(),
            audio: AudioConfig::default(),
            subtitles: SubtitleConfig::default(),
            stop_grace_ms: 500,
        }
    }
}

impl PlayerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> PlaybackResult<()> {
        if !(self.fps.is_finite() && self.fps > 0.0 && self.fps <= MAX_FPS) {
            return Err(PlaybackError::config(format!(
                "fps must be in (0, {MAX_FPS}], got {}",
                self.fps
            )));
        }
        if !(self.pixel_aspect_ratio.is_finite() && self.pixel_aspect_ratio > 0.0) {
            return Err(PlaybackError::config(format!(
                "pixel_aspect_ratio must be positive, got {}",
                self.pixel_aspect_ratio
            )));
        }
        if self.audio.volume > 100 {
            return Err(PlaybackError::config(format!(
                "audio.volume must be 0..=100, got {}",
                self.audio.volume
            )));
        }
        if !(1000..=192_000).contains(&self.audio.sample_rate) {
            return Err(PlaybackError::config(format!(
                "audio.sample_rate must be 1000..=192000, got {}",
                self.audio.sample_rate
            )));
        }
        if self.audio.window_ms == 0 {
            return Err(PlaybackError::config("audio.window_ms must be positive"));
        }
        if !(self.subtitles.font_px.is_finite() && self.subtitles.font_px > 0.0) {
            return Err(PlaybackError::config("subtitles.font_px must be positive"));
        }
        for (name, value) in [
            ("tools.ffmpeg", &self.tools.ffmpeg),
            ("tools.ffprobe", &self.tools.ffprobe),
            ("tools.ffplay", &self.tools.ffplay),
        ] {
            if value.trim().is_empty() {
                return Err(PlaybackError::config(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }

    /// Apply `TTYVID_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> PlaybackResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> PlaybackResult<()> {
        if let Some(value) = lookup(ENV_DITHER) {
            self.dither.mode = Some(value.parse::<DitherChoice>()?);
        }
        if let Some(value) = lookup(ENV_BITS) {
            let bits = value.trim().parse::<u8>().map_err(|_| {
                PlaybackError::config(format!("{ENV_BITS} must be an integer, got '{value}'"))
            })?;
            self.dither.bits = Some(bits);
        }
        if let Some(value) = lookup(ENV_FFMPEG) {
            self.tools.ffmpeg = value;
        }
        if let Some(value) = lookup(ENV_FFPROBE) {
            self.tools.ffprobe = value;
        }
        if let Some(value) = lookup(ENV_FFPLAY) {
            self.tools.ffplay = value;
        }
        if let Some(enabled) = resolve_bool_override(None, lookup(ENV_LOOP)) {
            self.loop_playback = enabled;
        }
        Ok(())
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::dither::DitherMode;

    #[test]
    fn yaml_overrides_defaults() {
        let yaml = r#"
fps: 24
loop: true
background: [0, 0, 0, 255]
dither:
  mode: atkinson-stable
  bits: 3
audio:
  waveform: true
tools:
  ffmpeg: /usr/local/bin/ffmpeg
"#;
        let config: PlayerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.fps, 24.0);
        assert!(config.loop_playback);
        assert_eq!(config.background, Some([0, 0, 0, 255]));
        assert_eq!(
            config.dither.mode,
            Some(DitherChoice::Mode(DitherMode::AtkinsonStable))
        );
        assert!(config.audio.waveform);
        assert!(config.audio.playback);
        assert_eq!(config.tools.ffmpeg, "/usr/local/bin/ffmpeg");
        assert_eq!(config.tools.ffprobe, "ffprobe");
        config.validate().unwrap();
    }

    #[test]
    fn unknown_keys_and_modes_are_rejected() {
        assert!(serde_yaml::from_str::<PlayerConfig>("fsp: 30").is_err());
        assert!(serde_yaml::from_str::<PlayerConfig>("dither:\n  mode: swirl").is_err());
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = PlayerConfig {
            fps: 0.0,
            ..PlayerConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().code(), "CONFIG");
        config.fps = 30.0;
        config.audio.volume = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DITHER, "auto"),
            (ENV_BITS, "4"),
            (ENV_FFPLAY, "/opt/ffplay"),
            (ENV_LOOP, "on"),
        ]);
        let mut config = PlayerConfig::default();
        config.dither.mode = Some(DitherChoice::Mode(DitherMode::Sierra));
        config
            .apply_env_from(|key| env.get(key).map(|value| value.to_string()))
            .unwrap();
        assert_eq!(config.dither.mode, Some(DitherChoice::Auto));
        assert_eq!(config.dither.bits, Some(4));
        assert_eq!(config.tools.ffplay, "/opt/ffplay");
        assert!(config.loop_playback);

        let bad = HashMap::from([(ENV_BITS, "many")]);
        assert!(PlayerConfig::default()
            .apply_env_from(|key| bad.get(key).map(|value| value.to_string()))
            .is_err());
    }

    #[test]
    fn cli_beats_env() {
        assert_eq!(resolve_bool_override(Some(false), Some("1".into())), Some(false));
        assert_eq!(resolve_bool_override(None, Some("off".into())), Some(false));
        assert_eq!(resolve_bool_override(None, Some("maybe".into())), None);
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttyvid.yaml");
        std::fs::write(&path, "fps: 12\nstop_grace_ms: 50\n").unwrap();
        let config = PlayerConfig::load(&path).unwrap();
        assert_eq!(config.fps, 12.0);
        assert_eq!(config.stop_grace(), Duration::from_millis(50));

        std::fs::write(&path, "fps: -1\n").unwrap();
        let error = PlayerConfig::load(&path).unwrap_err();
        assert!(format!("{error:#}").contains("fps"));
    }
}
