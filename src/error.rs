use std::io;
use std::process::ExitStatus;

use serde::Serialize;
use thiserror::Error;

pub type PlaybackResult<T> = Result<T, PlaybackError>;

/// Everything that can go wrong between the decoder pipe and the surface.
///
/// Only [`PlaybackError::ProcessSpawn`] and [`PlaybackError::ProcessExit`] ever end a
/// playback; the rest are absorbed where they happen and logged with their
/// [`code`](PlaybackError::code).
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("failed to spawn {process} process `{program}`: {source}")]
    ProcessSpawn {
        process: &'static str,
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{process} process terminated abnormally ({status})")]
    ProcessExit {
        process: &'static str,
        status: ExitStatus,
    },

    #[error("{process} output stream failed: {source}")]
    StreamRead {
        process: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("dimension probe failed for '{src}': {reason}")]
    ProbeFailure { src: String, reason: String },

    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    BufferSizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("render in progress, frame {frame_index} dropped")]
    ConcurrentWriteConflict { frame_index: u64 },

    #[error("dither depth {requested} is outside 1..=8, clamped to {clamped}")]
    DitherParameter { requested: u8, clamped: u8 },

    #[error("subtitle block {block}: {reason}")]
    SubtitleParse { block: usize, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("player task is no longer running")]
    PlayerClosed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PlaybackError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Stable machine-readable code, used as the `code` field of log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProcessSpawn { .. } => "PROCESS_SPAWN",
            Self::ProcessExit { .. } => "PROCESS_EXIT",
            Self::StreamRead { .. } => "STREAM_READ",
            Self::ProbeFailure { .. } => "PROBE_FAILURE",
            Self::BufferSizeMismatch { .. } => "BUFFER_SIZE_MISMATCH",
            Self::ConcurrentWriteConflict { .. } => "CONCURRENT_WRITE_CONFLICT",
            Self::DitherParameter { .. } => "DITHER_PARAMETER",
            Self::SubtitleParse { .. } => "SUBTITLE_PARSE",
            Self::Config(_) => "CONFIG",
            Self::PlayerClosed => "PLAYER_CLOSED",
            Self::Io(_) => "IO",
        }
    }

    /// Whether playback can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::ProcessSpawn { .. }
                | Self::ProcessExit { .. }
                | Self::StreamRead { .. }
                | Self::PlayerClosed
        )
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code(),
            message: self.to_string(),
            recoverable: self.is_recoverable(),
        }
    }
}

/// Serializable summary of an error, printed by the CLI with `--json`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    pub recoverable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_errors_are_not_recoverable() {
        let spawn = PlaybackError::ProcessSpawn {
            process: "decoder",
            program: "ffmpeg".to_owned(),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(spawn.code(), "PROCESS_SPAWN");
        assert!(!spawn.is_recoverable());

        let clamp = PlaybackError::DitherParameter {
            requested: 12,
            clamped: 8,
        };
        assert!(clamp.is_recoverable());
        assert_eq!(clamp.report().code, "DITHER_PARAMETER");
    }

    #[test]
    fn mismatch_message_names_both_sizes() {
        let error = PlaybackError::BufferSizeMismatch {
            width: 4,
            height: 2,
            expected: 32,
            actual: 30,
        };
        let message = error.to_string();
        assert!(message.contains("30"));
        assert!(message.contains("32"));
    }
}
