use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::ChildStdout;

use crate::config::AudioConfig;
use crate::launcher::{AudioRequest, ProcessKind, ProcessLauncher};
use crate::process::ManagedChild;
use crate::waveform::WaveformBuffer;

/// The optional sample extractor and audible player of one session.
///
/// Neither sidecar can end playback: spawn failures are logged and the sidecar
/// stays off until the next [`start`](Self::start).
pub struct AudioSidecarController {
    launcher: Arc<dyn ProcessLauncher>,
    grace: Duration,
    config: AudioConfig,
    src: Option<String>,
    extractor: Option<ManagedChild>,
    player: Option<ManagedChild>,
    samples: Option<ChildStdout>,
    waveform: Option<WaveformBuffer>,
    abort: Arc<AtomicBool>,
    paused: bool,
}

impl AudioSidecarController {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, grace: Duration, config: AudioConfig) -> Self {
        Self {
            launcher,
            grace,
            config,
            src: None,
            extractor: None,
            player: None,
            samples: None,
            waveform: None,
            abort: Arc::new(AtomicBool::new(false)),
            paused: false,
        }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn volume(&self) -> u8 {
        self.config.volume
    }

    pub fn is_player_running(&self) -> bool {
        self.player.is_some()
    }

    pub fn is_extractor_running(&self) -> bool {
        self.extractor.is_some()
    }

    fn request(&self, src: &str, start_seconds: f64) -> AudioRequest {
        AudioRequest {
            src: src.to_owned(),
            start_seconds,
            sample_rate: self.config.sample_rate,
            volume: self.config.volume,
        }
    }

    /// Tear down any running sidecars, then spawn the enabled ones at `start_seconds`.
    pub async fn start(&mut self, src: &str, start_seconds: f64) {
        self.stop().await;
        self.abort = Arc::new(AtomicBool::new(false));
        self.src = Some(src.to_owned());
        self.paused = false;
        let request = self.request(src, start_seconds);

        if self.config.waveform {
            let command = self.launcher.extract_audio_command(&request);
            match ManagedChild::spawn(ProcessKind::AudioExtractor, command, self.abort.clone()) {
                Ok(mut child) => {
                    self.samples = child.take_stdout();
                    self.extractor = Some(child);
                    self.waveform = Some(WaveformBuffer::new(
                        self.config.sample_rate,
                        self.config.window_ms,
                    ));
                }
                Err(error) => {
                    tracing::warn!(code = error.code(), "{error}; waveform disabled");
                }
            }
        }
        if self.config.playback {
            self.spawn_player(&request);
        }
    }

    fn spawn_player(&mut self, request: &AudioRequest) {
        let command = self.launcher.play_audio_command(request);
        match ManagedChild::spawn(ProcessKind::AudioPlayer, command, self.abort.clone()) {
            Ok(child) => self.player = Some(child),
            Err(error) => tracing::warn!(code = error.code(), "{error}; audio disabled"),
        }
    }

    pub async fn stop(&mut self) {
        self.abort.store(true, Ordering::Relaxed);
        self.samples = None;
        if let Some(mut extractor) = self.extractor.take() {
            extractor.terminate(self.grace).await;
        }
        if let Some(mut player) = self.player.take() {
            player.terminate(self.grace).await;
        }
        if let Some(waveform) = self.waveform.as_mut() {
            waveform.clear();
        }
        self.paused = false;
    }

    pub fn pause(&mut self) {
        for child in [self.extractor.as_mut(), self.player.as_mut()]
            .into_iter()
            .flatten()
        {
            child.suspend();
        }
        self.paused = true;
    }

    pub fn resume(&mut self) {
        for child in [self.extractor.as_mut(), self.player.as_mut()]
            .into_iter()
            .flatten()
        {
            child.resume();
        }
        self.paused = false;
    }

    /// Change the volume and restart the player at `position_seconds` so it takes
    /// effect. Values above 100 are clamped.
    pub async fn set_volume(&mut self, volume: u8, position_seconds: f64) {
        self.config.volume = volume.min(100);
        let Some(src) = self.src.clone() else {
            return;
        };
        if !self.config.playback {
            return;
        }
        if let Some(mut player) = self.player.take() {
            player.terminate(self.grace).await;
        }
        let request = self.request(&src, position_seconds);
        self.spawn_player(&request);
        if self.paused {
            if let Some(player) = self.player.as_mut() {
                player.suspend();
            }
        }
    }

    /// Hand the extractor's sample stream to the reader.
    pub fn take_sample_stream(&mut self) -> Option<ChildStdout> {
        self.samples.take()
    }

    pub fn ingest(&mut self, bytes: &[u8]) {
        if let Some(waveform) = self.waveform.as_mut() {
            waveform.push_pcm_s16le(bytes);
        }
    }

    /// The extractor closed its output. Reaps it; a failure only disables the waveform.
    pub async fn on_extractor_eof(&mut self) {
        let Some(mut extractor) = self.extractor.take() else {
            return;
        };
        match extractor.wait().await {
            Ok(status) if status.success() => {
                tracing::debug!(process = ProcessKind::AudioExtractor.label(), "finished");
            }
            Ok(status) => {
                tracing::warn!(
                    process = ProcessKind::AudioExtractor.label(),
                    %status,
                    "extractor failed; waveform disabled for this session"
                );
                self.waveform = None;
            }
            Err(error) => {
                tracing::warn!(code = error.code(), "{error}");
                self.waveform = None;
            }
        }
    }

    pub fn has_waveform(&self) -> bool {
        self.waveform.is_some()
    }

    /// Recompute and return one peak per column.
    pub fn waveform_peaks(&mut self, columns: usize) -> Option<&[f32]> {
        self.waveform
            .as_mut()
            .map(|waveform| waveform.recompute_peaks(columns))
    }
}
