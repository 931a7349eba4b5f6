use tokio::process::Command;

use crate::config::ToolPaths;

/// The four helper processes a playback session can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    Decoder,
    Probe,
    AudioExtractor,
    AudioPlayer,
}

impl ProcessKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Decoder => "decoder",
            Self::Probe => "probe",
            Self::AudioExtractor => "audio-extractor",
            Self::AudioPlayer => "audio-player",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeRequest {
    pub src: String,
    pub start_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioRequest {
    pub src: String,
    pub start_seconds: f64,
    pub sample_rate: u32,
    /// 0..=100.
    pub volume: u8,
}

/// Builds the command line for each helper process. Commands come back
/// unconfigured; stdio and spawning belong to [`crate::process::ManagedChild`].
pub trait ProcessLauncher: Send + Sync {
    fn label(&self) -> &'static str;

    /// Raw RGBA8 frames of exactly `width * height * 4` bytes on stdout.
    fn decode_command(&self, request: &DecodeRequest) -> Command;

    /// Prints `width,height` of the first video stream.
    fn probe_command(&self, src: &str) -> Command;

    /// Mono signed 16-bit little-endian PCM on stdout.
    fn extract_audio_command(&self, request: &AudioRequest) -> Command;

    /// Audible playback; produces no useful stdout.
    fn play_audio_command(&self, request: &AudioRequest) -> Command;
}

#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    tools: ToolPaths,
}

impl FfmpegLauncher {
    pub fn new(tools: ToolPaths) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }
}

impl Default for FfmpegLauncher {
    fn default() -> Self {
        Self::new(ToolPaths::default())
    }
}

fn seek_args(start_seconds: f64) -> Vec<String> {
    if start_seconds > 0.0 && start_seconds.is_finite() {
        vec!["-ss".to_owned(), format!("{start_seconds:.3}")]
    } else {
        Vec::new()
    }
}

impl ProcessLauncher for FfmpegLauncher {
    fn label(&self) -> &'static str {
        "ffmpeg"
    }

    fn decode_command(&self, request: &DecodeRequest) -> Command {
        let mut command = Command::new(&self.tools.ffmpeg);
        command.args(["-hide_banner", "-loglevel", "error"]);
        command.args(seek_args(request.start_seconds));
        command
            .arg("-re")
            .arg("-i")
            .arg(&request.src)
            .args(["-an", "-sn", "-f", "rawvideo", "-pix_fmt", "rgba"])
            .arg("-s")
            .arg(format!("{}x{}", request.width, request.height))
            .args(["-sws_flags", "area"])
            .arg("-r")
            .arg(request.fps.to_string())
            .arg("pipe:1");
        command
    }

    fn probe_command(&self, src: &str) -> Command {
        let mut command = Command::new(&self.tools.ffprobe);
        command
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height"])
            .args(["-of", "csv=s=,:p=0"])
            .arg(src);
        command
    }

    fn extract_audio_command(&self, request: &AudioRequest) -> Command {
        let mut command = Command::new(&self.tools.ffmpeg);
        command.args(["-hide_banner", "-loglevel", "error"]);
        command.args(seek_args(request.start_seconds));
        command
            .arg("-re")
            .arg("-i")
            .arg(&request.src)
            .args(["-vn", "-ac", "1", "-ar"])
            .arg(request.sample_rate.to_string())
            .args(["-f", "s16le", "pipe:1"]);
        command
    }

    fn play_audio_command(&self, request: &AudioRequest) -> Command {
        let mut command = Command::new(&self.tools.ffplay);
        command.args(["-nodisp", "-autoexit", "-loglevel", "error"]);
        command.args(seek_args(request.start_seconds));
        command
            .arg("-volume")
            .arg(request.volume.min(100).to_string())
            .arg(&request.src);
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(command: &Command) -> Vec<String> {
        command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn decode_command_requests_raw_rgba_at_output_size() {
        let launcher = FfmpegLauncher::default();
        let command = launcher.decode_command(&DecodeRequest {
            src: "clip.mp4".to_owned(),
            start_seconds: 0.0,
            width: 64,
            height: 21,
            fps: 30.0,
        });
        assert_eq!(command.as_std().get_program(), "ffmpeg");
        assert_eq!(
            args_of(&command),
            [
                "-hide_banner", "-loglevel", "error", "-re", "-i", "clip.mp4", "-an", "-sn",
                "-f", "rawvideo", "-pix_fmt", "rgba", "-s", "64x21", "-sws_flags", "area",
                "-r", "30", "pipe:1",
            ]
        );
    }

    #[test]
    fn seek_is_placed_before_input() {
        let launcher = FfmpegLauncher::default();
        let command = launcher.decode_command(&DecodeRequest {
            src: "clip.mp4".to_owned(),
            start_seconds: 12.5,
            width: 16,
            height: 48,
            fps: 23.976,
        });
        let args = args_of(&command);
        let ss = args.iter().position(|arg| arg == "-ss").unwrap();
        let input = args.iter().position(|arg| arg == "-i").unwrap();
        assert!(ss < input);
        assert_eq!(args[ss + 1], "12.500");
        assert!(args.contains(&"23.976".to_owned()));
    }

    #[test]
    fn audio_commands() {
        let launcher = FfmpegLauncher::new(ToolPaths {
            ffmpeg: "/opt/ff/ffmpeg".to_owned(),
            ffprobe: "ffprobe".to_owned(),
            ffplay: "ffplay".to_owned(),
        });
        let request = AudioRequest {
            src: "a.mkv".to_owned(),
            start_seconds: 3.0,
            sample_rate: 8000,
            volume: 150,
        };
        let extract = launcher.extract_audio_command(&request);
        assert_eq!(extract.as_std().get_program(), "/opt/ff/ffmpeg");
        let args = args_of(&extract);
        assert!(args.ends_with(&[
            "-vn".to_owned(),
            "-ac".to_owned(),
            "1".to_owned(),
            "-ar".to_owned(),
            "8000".to_owned(),
            "-f".to_owned(),
            "s16le".to_owned(),
            "pipe:1".to_owned(),
        ]));

        let play = args_of(&launcher.play_audio_command(&request));
        assert_eq!(
            play,
            ["-nodisp", "-autoexit", "-loglevel", "error", "-ss", "3.000", "-volume", "100", "a.mkv"]
        );
    }

    #[test]
    fn probe_command_selects_first_video_stream() {
        let args = args_of(&FfmpegLauncher::default().probe_command("x.webm"));
        assert_eq!(
            args,
            [
                "-v", "error", "-select_streams", "v:0", "-show_entries", "stream=width,height",
                "-of", "csv=s=,:p=0", "x.webm",
            ]
        );
    }
}
