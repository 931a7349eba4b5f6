use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dither::{clamp_bits, DitherMode};
use crate::error::PlaybackError;

/// How many colors the attached display can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorCapability {
    Monochrome,
    Ansi16,
    Ansi256,
    TrueColor,
}

impl ColorCapability {
    /// Detect from the process environment.
    pub fn detect() -> Self {
        let term = std::env::var("TERM").ok();
        let colorterm = std::env::var("COLORTERM").ok();
        let no_color = std::env::var_os("NO_COLOR").is_some();
        Self::from_env(term.as_deref(), colorterm.as_deref(), no_color)
    }

    pub fn from_env(term: Option<&str>, colorterm: Option<&str>, no_color: bool) -> Self {
        if no_color || term == Some("dumb") {
            return Self::Monochrome;
        }
        if let Some(colorterm) = colorterm {
            let colorterm = colorterm.to_ascii_lowercase();
            if colorterm == "truecolor" || colorterm == "24bit" {
                return Self::TrueColor;
            }
        }
        if term.is_some_and(|term| term.contains("256color")) {
            return Self::Ansi256;
        }
        Self::Ansi16
    }

    /// Mode and depth used when neither the call nor the configuration picks one.
    pub fn default_dither(self) -> DitherSettings {
        let (mode, bits) = match self {
            Self::Monochrome => (DitherMode::FloydSteinbergStable, 1),
            Self::Ansi16 => (DitherMode::Posterize, 2),
            Self::Ansi256 => (DitherMode::FloydSteinbergStable, 3),
            Self::TrueColor => (DitherMode::FloydSteinbergStable, 6),
        };
        DitherSettings { mode, bits }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Monochrome => "monochrome",
            Self::Ansi16 => "16-color",
            Self::Ansi256 => "256-color",
            Self::TrueColor => "truecolor",
        }
    }
}

/// A dither mode request: a concrete mode, or `auto` to defer to the next source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DitherChoice {
    Auto,
    Mode(DitherMode),
}

impl FromStr for DitherChoice {
    type Err = PlaybackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        s.parse().map(Self::Mode)
    }
}

impl TryFrom<String> for DitherChoice {
    type Error = PlaybackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DitherChoice> for String {
    fn from(value: DitherChoice) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DitherChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Mode(mode) => fmt::Display::fmt(mode, f),
        }
    }
}

/// Optional mode/depth pair from one source (a call or the configuration).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DitherOverride {
    pub mode: Option<DitherChoice>,
    pub bits: Option<u8>,
}

impl DitherOverride {
    pub fn is_empty(&self) -> bool {
        self.mode.is_none() && self.bits.is_none()
    }
}

/// Fully resolved dither parameters; also the composite cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DitherSettings {
    pub mode: DitherMode,
    pub bits: u8,
}

/// Resolve mode and depth independently: call, then configuration, then the
/// capability default. `auto` at any level falls through to the next one.
pub fn resolve_dither(
    call: &DitherOverride,
    config: &DitherOverride,
    capability: ColorCapability,
) -> DitherSettings {
    let fallback = capability.default_dither();
    let explicit = |choice: Option<DitherChoice>| match choice {
        Some(DitherChoice::Mode(mode)) => Some(mode),
        Some(DitherChoice::Auto) | None => None,
    };
    let mode = explicit(call.mode)
        .or_else(|| explicit(config.mode))
        .unwrap_or(fallback.mode);
    let bits = call.bits.or(config.bits).map_or(fallback.bits, clamp_bits);
    DitherSettings { mode, bits }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_follows_env_precedence() {
        assert_eq!(
            ColorCapability::from_env(Some("xterm-256color"), Some("truecolor"), true),
            ColorCapability::Monochrome
        );
        assert_eq!(
            ColorCapability::from_env(Some("dumb"), None, false),
            ColorCapability::Monochrome
        );
        assert_eq!(
            ColorCapability::from_env(Some("xterm"), Some("24bit"), false),
            ColorCapability::TrueColor
        );
        assert_eq!(
            ColorCapability::from_env(Some("screen-256color"), None, false),
            ColorCapability::Ansi256
        );
        assert_eq!(
            ColorCapability::from_env(Some("xterm"), None, false),
            ColorCapability::Ansi16
        );
        assert_eq!(
            ColorCapability::from_env(None, None, false),
            ColorCapability::Ansi16
        );
    }

    #[test]
    fn capability_defaults() {
        let mono = ColorCapability::Monochrome.default_dither();
        assert_eq!(mono.bits, 1);
        let ansi16 = ColorCapability::Ansi16.default_dither();
        assert_eq!((ansi16.mode, ansi16.bits), (DitherMode::Posterize, 2));
        let ansi256 = ColorCapability::Ansi256.default_dither();
        assert_eq!((ansi256.mode, ansi256.bits), (DitherMode::FloydSteinbergStable, 3));
        let truecolor = ColorCapability::TrueColor.default_dither();
        assert_eq!(truecolor.bits, 6);
    }

    #[test]
    fn call_beats_config_beats_capability() {
        let config = DitherOverride {
            mode: Some(DitherChoice::Mode(DitherMode::Atkinson)),
            bits: Some(4),
        };
        let call = DitherOverride {
            mode: Some(DitherChoice::Mode(DitherMode::Ordered)),
            bits: None,
        };
        let resolved = resolve_dither(&call, &config, ColorCapability::TrueColor);
        assert_eq!(resolved.mode, DitherMode::Ordered);
        assert_eq!(resolved.bits, 4);

        let resolved = resolve_dither(&DitherOverride::default(), &config, ColorCapability::Ansi16);
        assert_eq!(resolved.mode, DitherMode::Atkinson);

        let auto = DitherOverride {
            mode: Some(DitherChoice::Auto),
            bits: None,
        };
        let resolved = resolve_dither(&auto, &DitherOverride::default(), ColorCapability::Ansi256);
        assert_eq!(resolved, ColorCapability::Ansi256.default_dither());
    }

    #[test]
    fn out_of_range_bits_are_clamped() {
        let call = DitherOverride {
            mode: None,
            bits: Some(0),
        };
        let resolved = resolve_dither(&call, &DitherOverride::default(), ColorCapability::TrueColor);
        assert_eq!(resolved.bits, 1);
    }

    #[test]
    fn choice_parses_auto_and_modes() {
        assert_eq!("AUTO".parse::<DitherChoice>().unwrap(), DitherChoice::Auto);
        assert_eq!(
            "blue-noise".parse::<DitherChoice>().unwrap(),
            DitherChoice::Mode(DitherMode::BlueNoise)
        );
        assert_eq!(DitherChoice::Mode(DitherMode::Sierra).to_string(), "sierra");
    }
}
