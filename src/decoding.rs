use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::ChildStdout;

use crate::error::{PlaybackError, PlaybackResult};
use crate::geometry::DEFAULT_SOURCE_DIMENSIONS;
use crate::launcher::{DecodeRequest, ProcessKind, ProcessLauncher};
use crate::process::ManagedChild;

pub const DEFAULT_PROBE_DIMENSIONS: (u32, u32) = DEFAULT_SOURCE_DIMENSIONS;
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw RGBA frame bytes from the decoder.
pub type DecoderOutput = ChildStdout;

/// Owns at most one decoder process at a time.
pub struct DecoderProcessController {
    launcher: Arc<dyn ProcessLauncher>,
    grace: Duration,
    child: Option<ManagedChild>,
    abort: Arc<AtomicBool>,
}

impl DecoderProcessController {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, grace: Duration) -> Self {
        Self {
            launcher,
            grace,
            child: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Width and height of the first video stream. Falls back to
    /// [`DEFAULT_PROBE_DIMENSIONS`] on any failure; never errors.
    pub async fn probe_dimensions(&self, src: &str) -> (u32, u32) {
        match self.try_probe(src).await {
            Ok(dimensions) => {
                tracing::debug!(src, width = dimensions.0, height = dimensions.1, "probed");
                dimensions
            }
            Err(error) => {
                let (width, height) = DEFAULT_PROBE_DIMENSIONS;
                tracing::warn!(code = error.code(), width, height, "{error}; using default");
                DEFAULT_PROBE_DIMENSIONS
            }
        }
    }

    async fn try_probe(&self, src: &str) -> PlaybackResult<(u32, u32)> {
        let failure = |reason: String| PlaybackError::ProbeFailure {
            src: src.to_owned(),
            reason,
        };
        let mut command = self.launcher.probe_command(src);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let output = tokio::time::timeout(PROBE_TIMEOUT, command.output())
            .await
            .map_err(|_| failure(format!("no answer within {}s", PROBE_TIMEOUT.as_secs())))?
            .map_err(|error| failure(format!("could not run probe: {error}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failure(format!(
                "probe exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_probe_output(&stdout)
            .ok_or_else(|| failure(format!("unparsable probe output '{}'", stdout.trim())))
    }

    /// Spawn the decoder for `request`, stopping any previous one first.
    pub async fn start(&mut self, request: &DecodeRequest) -> PlaybackResult<DecoderOutput> {
        self.stop().await;
        self.abort = Arc::new(AtomicBool::new(false));

        let command = self.launcher.decode_command(request);
        let mut child = ManagedChild::spawn(ProcessKind::Decoder, command, self.abort.clone())?;
        let stdout = child.take_stdout().ok_or_else(|| PlaybackError::StreamRead {
            process: ProcessKind::Decoder.label(),
            source: std::io::Error::other("decoder stdout was not captured"),
        })?;
        tracing::info!(
            src = %request.src,
            width = request.width,
            height = request.height,
            fps = request.fps,
            start = request.start_seconds,
            "decoder started"
        );
        self.child = Some(child);
        Ok(stdout)
    }

    /// Graceful-then-forced teardown. No-op when nothing is running.
    pub async fn stop(&mut self) {
        self.abort.store(true, Ordering::Relaxed);
        if let Some(mut child) = self.child.take() {
            child.terminate(self.grace).await;
        }
    }

    /// Reap the decoder after its output reached EOF.
    ///
    /// A decoder still running at `deadline` is terminated and treated as a
    /// clean finish. Cancel-safe: dropping the future leaves the child owned
    /// here for [`stop`](Self::stop).
    pub async fn finish(&mut self, deadline: Instant) -> PlaybackResult<()> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        let deadline = tokio::time::Instant::from_std(deadline);
        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(
                    process = ProcessKind::Decoder.label(),
                    "output closed but process still running, terminating"
                );
                child.terminate(self.grace).await;
                self.child = None;
                self.abort.store(true, Ordering::Relaxed);
                return Ok(());
            }
        };
        self.child = None;
        self.abort.store(true, Ordering::Relaxed);
        if status.success() {
            Ok(())
        } else {
            Err(PlaybackError::ProcessExit {
                process: ProcessKind::Decoder.label(),
                status,
            })
        }
    }

    pub fn suspend(&mut self) {
        if let Some(child) = self.child.as_mut() {
            child.suspend();
        }
    }

    pub fn resume(&mut self) {
        if let Some(child) = self.child.as_mut() {
            child.resume();
        }
    }
}

/// Parses `width,height` from the first non-empty line.
pub fn parse_probe_output(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().map(str::trim).find(|line| !line.is_empty())?;
    let mut parts = line.split(',').map(str::trim);
    let width = parts.next()?.parse::<u32>().ok()?;
    let height = parts.next()?.parse::<u32>().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_output_parsing() {
        assert_eq!(parse_probe_output("1920,1080\n"), Some((1920, 1080)));
        assert_eq!(parse_probe_output("\n 640 , 360 ,\n"), Some((640, 360)));
        assert_eq!(parse_probe_output("0,1080"), None);
        assert_eq!(parse_probe_output("N/A,N/A"), None);
        assert_eq!(parse_probe_output(""), None);
    }
}

#[cfg(all(test, unix))]
mod probe_tests {
    use tokio::process::Command;

    use super::*;
    use crate::launcher::AudioRequest;

    struct ProbeScript(&'static str);

    impl ProcessLauncher for ProbeScript {
        fn label(&self) -> &'static str {
            "probe-script"
        }

        fn decode_command(&self, _request: &DecodeRequest) -> Command {
            Command::new("true")
        }

        fn probe_command(&self, _src: &str) -> Command {
            if self.0.starts_with('/') {
                return Command::new(self.0);
            }
            let mut command = Command::new("sh");
            command.arg("-c").arg(self.0);
            command
        }

        fn extract_audio_command(&self, _request: &AudioRequest) -> Command {
            Command::new("true")
        }

        fn play_audio_command(&self, _request: &AudioRequest) -> Command {
            Command::new("true")
        }
    }

    async fn probe(script: &'static str) -> (u32, u32) {
        DecoderProcessController::new(Arc::new(ProbeScript(script)), Duration::from_millis(100))
            .probe_dimensions("clip.mp4")
            .await
    }

    #[tokio::test]
    async fn probe_reads_dimensions() {
        assert_eq!(probe("echo 1280,720").await, (1280, 720));
    }

    #[tokio::test]
    async fn probe_falls_back_on_any_failure() {
        assert_eq!(probe("/nonexistent/ttyvid-probe").await, DEFAULT_PROBE_DIMENSIONS);
        assert_eq!(probe("echo garbage").await, DEFAULT_PROBE_DIMENSIONS);
        assert_eq!(probe("echo 1280,720; exit 1").await, DEFAULT_PROBE_DIMENSIONS);
    }

    struct DecodeScript(&'static str);

    impl ProcessLauncher for DecodeScript {
        fn label(&self) -> &'static str {
            "decode-script"
        }

        fn decode_command(&self, _request: &DecodeRequest) -> Command {
            let mut command = Command::new("sh");
            command.arg("-c").arg(self.0);
            command
        }

        fn probe_command(&self, _src: &str) -> Command {
            Command::new("true")
        }

        fn extract_audio_command(&self, _request: &AudioRequest) -> Command {
            Command::new("true")
        }

        fn play_audio_command(&self, _request: &AudioRequest) -> Command {
            Command::new("true")
        }
    }

    async fn started(script: &'static str) -> DecoderProcessController {
        let mut decoder =
            DecoderProcessController::new(Arc::new(DecodeScript(script)), Duration::from_millis(100));
        let request = DecodeRequest {
            src: "clip.mp4".to_owned(),
            start_seconds: 0.0,
            width: 16,
            height: 48,
            fps: 30.0,
        };
        decoder.start(&request).await.unwrap();
        decoder
    }

    #[tokio::test]
    async fn finish_reports_abnormal_exit() {
        let mut decoder = started("exit 4").await;
        assert!(decoder.is_running());
        let deadline = Instant::now() + Duration::from_secs(10);
        let error = decoder.finish(deadline).await.unwrap_err();
        assert_eq!(error.code(), "PROCESS_EXIT");
        assert!(!decoder.is_running());
        // Nothing left to reap or stop.
        decoder.finish(deadline).await.unwrap();
        decoder.stop().await;
    }

    #[tokio::test]
    async fn finish_terminates_a_decoder_that_outlives_its_output() {
        let mut decoder = started("exec 1>&-; exec sleep 30").await;
        let begun = Instant::now();
        decoder
            .finish(begun + Duration::from_millis(100))
            .await
            .unwrap();
        assert!(!decoder.is_running());
        assert!(begun.elapsed() < Duration::from_secs(5));
    }
}
