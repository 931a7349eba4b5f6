//! SubRip (`.srt`) subtitle tracks.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{PlaybackError, PlaybackResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtitleCue {
    pub index: u32,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl SubtitleCue {
    pub fn contains(&self, seconds: f64) -> bool {
        self.start <= seconds && seconds <= self.end
    }
}

/// Cues sorted by start time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubtitleTrack {
    cues: Vec<SubtitleCue>,
}

impl SubtitleTrack {
    /// Parse SubRip text. Malformed blocks are skipped with a warning.
    pub fn parse(text: &str) -> Self {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let text = text.replace("\r\n", "\n").replace('\r', "\n");

        let mut cues = Vec::new();
        let mut block_lines: Vec<&str> = Vec::new();
        let mut block_number = 0_usize;
        for line in text.lines().chain(std::iter::once("")) {
            if !line.trim().is_empty() {
                block_lines.push(line);
                continue;
            }
            if block_lines.is_empty() {
                continue;
            }
            block_number += 1;
            match parse_block(&block_lines, block_number) {
                Ok(cue) => cues.push(cue),
                Err(error) => tracing::warn!(code = error.code(), "{error}"),
            }
            block_lines.clear();
        }

        cues.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self { cues }
    }

    pub fn load(path: &Path) -> PlaybackResult<Self> {
        let bytes = std::fs::read(path)?;
        let track = Self::parse(&String::from_utf8_lossy(&bytes));
        tracing::debug!(path = %path.display(), cues = track.len(), "subtitles loaded");
        Ok(track)
    }

    /// The cue covering `seconds`, both ends inclusive.
    pub fn find_active_cue(&self, seconds: f64) -> Option<&SubtitleCue> {
        for cue in &self.cues {
            if cue.start > seconds {
                break;
            }
            if seconds <= cue.end {
                return Some(cue);
            }
        }
        None
    }

    pub fn cues(&self) -> &[SubtitleCue] {
        &self.cues
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }
}

fn timing_regex() -> &'static Regex {
    static TIMING_RE: OnceLock<Regex> = OnceLock::new();
    TIMING_RE.get_or_init(|| {
        Regex::new(r"^\s*(\d+:\d{1,2}:\d{1,2}[,.]\d{1,3})\s*-->\s*(\d+:\d{1,2}:\d{1,2}[,.]\d{1,3})")
            .expect("timing regex should compile")
    })
}

fn parse_block(lines: &[&str], block: usize) -> PlaybackResult<SubtitleCue> {
    let malformed = |reason: &str| PlaybackError::SubtitleParse {
        block,
        reason: reason.to_owned(),
    };

    let timing_at = lines
        .iter()
        .take(2)
        .position(|line| line.contains("-->"))
        .ok_or_else(|| malformed("missing timing line"))?;
    let index = if timing_at == 1 {
        lines[0]
            .trim()
            .parse::<u32>()
            .map_err(|_| malformed("cue index is not a number"))?
    } else {
        block as u32
    };

    let captures = timing_regex()
        .captures(lines[timing_at])
        .ok_or_else(|| malformed("unreadable timing line"))?;
    let start = captures
        .get(1)
        .and_then(|m| parse_timestamp(m.as_str()))
        .ok_or_else(|| malformed("bad start timestamp"))?;
    let end = captures
        .get(2)
        .and_then(|m| parse_timestamp(m.as_str()))
        .ok_or_else(|| malformed("bad end timestamp"))?;
    if end < start {
        return Err(malformed("cue ends before it starts"));
    }

    let text = lines[timing_at + 1..]
        .iter()
        .map(|line| strip_markup(line.trim()))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(SubtitleCue {
        index,
        start,
        end,
        text,
    })
}

/// `HH:MM:SS,mmm` (or `.` before the milliseconds) to seconds.
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let (clock, fraction) = value.trim().split_once([',', '.'])?;
    let mut parts = clock.split(':');
    let hours = parts.next()?.parse::<u64>().ok()?;
    let minutes = parts.next()?.parse::<u64>().ok()?;
    let seconds = parts.next()?.parse::<u64>().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }
    if fraction.is_empty() || fraction.len() > 3 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let millis = fraction.parse::<u64>().ok()? * 10_u64.pow(3 - fraction.len() as u32);
    let total_ms = ((hours * 60 + minutes) * 60 + seconds) * 1000 + millis;
    Some(total_ms as f64 / 1000.0)
}

/// Drop HTML-style tags and `{\...}` override blocks.
pub fn strip_markup(text: &str) -> String {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    static OVERRIDE_RE: OnceLock<Regex> = OnceLock::new();
    let tags = TAG_RE.get_or_init(|| Regex::new(r"</?[A-Za-z][^>]*>").expect("tag regex should compile"));
    let overrides = OVERRIDE_RE
        .get_or_init(|| Regex::new(r"\{\\[^}]*\}").expect("override regex should compile"));
    let without_tags = tags.replace_all(text, "");
    overrides.replace_all(&without_tags, "").trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps() {
        assert_eq!(parse_timestamp("00:00:01,500"), Some(1.5));
        assert_eq!(parse_timestamp("01:02:03.004"), Some(3723.004));
        assert_eq!(parse_timestamp("00:00:02,5"), Some(2.5));
        assert_eq!(parse_timestamp("00:61:00,000"), None);
        assert_eq!(parse_timestamp("00:00:01"), None);
    }

    #[test]
    fn markup_is_stripped() {
        assert_eq!(strip_markup("<i>Hello</i> <b>there</b>"), "Hello there");
        assert_eq!(strip_markup(r#"{\an8}<font color="red">Top</font>"#), "Top");
        assert_eq!(strip_markup("1 < 2"), "1 < 2");
    }

    #[test]
    fn tolerant_parsing() {
        let srt = "\u{feff}1\r\n00:00:01,000 --> 00:00:02,000\r\n<i>First</i>\r\n\r\n\
                   garbage block\r\n\r\n\
                   3\r\n00:00:05.000 --> 00:00:04,000\r\nbackwards\r\n\r\n\
                   4\r\n00:00:00,500 --> 00:00:00,900\r\nEarly\r\nsecond line\r\n";
        let track = SubtitleTrack::parse(srt);
        assert_eq!(track.len(), 2);
        assert_eq!(track.cues()[0].text, "Early\nsecond line");
        assert_eq!(track.cues()[1].text, "First");
        assert_eq!(track.cues()[1].index, 1);
    }
}
