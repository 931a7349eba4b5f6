//! Playback orchestration.
//!
//! One tokio task owns every piece of session state and runs a single `select!`
//! loop over commands, decoder output, audio samples, the pending frame's
//! deadline, the in-flight render job and the decoder's exit after EOF.
//! Compositing happens on the blocking
//! pool: the compositor and surface move into the job and come back when it
//! completes, so nothing is shared and nothing is locked.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::audio::AudioSidecarController;
use crate::capability::{ColorCapability, DitherOverride, DitherSettings};
use crate::compositor::LayerCompositor;
use crate::config::PlayerConfig;
use crate::decoding::{DecoderOutput, DecoderProcessController};
use crate::error::{PlaybackError, PlaybackResult};
use crate::frame::Frame;
use crate::geometry::{compute_output_dimensions, OutputDimensions};
use crate::launcher::{DecodeRequest, ProcessKind, ProcessLauncher};
use crate::layer::PixelLayer;
use crate::overlay::{SubtitleOverlay, WaveformOverlay};
use crate::scheduler::{FrameCounters, FrameOutcome, FrameScheduler};
use crate::subtitle::SubtitleTrack;
use crate::surface::RenderSurface;

const READ_CHUNK: usize = 64 * 1024;
const AUDIO_CHUNK: usize = 4 * 1024;

pub type DrawFn = Box<dyn FnOnce(&mut PixelLayer) + Send + 'static>;

pub enum PlayerCommand {
    Play { src: String, start_seconds: f64 },
    Pause,
    Resume,
    TogglePause,
    /// Absolute media position in seconds.
    Seek(f64),
    Stop,
    Resize { width: u32, height: u32 },
    /// Per-call dither override; highest precedence.
    SetDither(DitherOverride),
    SetVolume(u8),
    SetLoop(bool),
    LoadSubtitles(Option<SubtitleTrack>),
    Draw(DrawFn),
    Shutdown,
}

impl std::fmt::Debug for PlayerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Play { src, start_seconds } => f
                .debug_struct("Play")
                .field("src", src)
                .field("start_seconds", start_seconds)
                .finish(),
            Self::Pause => f.write_str("Pause"),
            Self::Resume => f.write_str("Resume"),
            Self::TogglePause => f.write_str("TogglePause"),
            Self::Seek(seconds) => f.debug_tuple("Seek").field(seconds).finish(),
            Self::Stop => f.write_str("Stop"),
            Self::Resize { width, height } => f
                .debug_struct("Resize")
                .field("width", width)
                .field("height", height)
                .finish(),
            Self::SetDither(dither) => f.debug_tuple("SetDither").field(dither).finish(),
            Self::SetVolume(volume) => f.debug_tuple("SetVolume").field(volume).finish(),
            Self::SetLoop(enabled) => f.debug_tuple("SetLoop").field(enabled).finish(),
            Self::LoadSubtitles(track) => f
                .debug_tuple("LoadSubtitles")
                .field(&track.as_ref().map(SubtitleTrack::len))
                .finish(),
            Self::Draw(_) => f.write_str("Draw(..)"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

#[derive(Debug)]
pub enum PlayerEvent {
    Started {
        src: String,
        output: OutputDimensions,
        start_seconds: f64,
    },
    Paused { position_seconds: f64 },
    Resumed { position_seconds: f64 },
    SubtitleChanged { text: Option<String> },
    /// The source ended and playback restarted from zero.
    Looped,
    /// The source played to the end. Never sent together with `Error` for one playback.
    Ended { counters: FrameCounters },
    Error(PlaybackError),
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Stopped,
    Playing,
    Paused,
    Stopping,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybackStatus {
    pub state: PlayerState,
    pub src: Option<String>,
    pub position_seconds: f64,
    pub counters: FrameCounters,
    pub output: Option<OutputDimensions>,
    pub dither: Option<DitherSettings>,
    pub subtitle: Option<String>,
    pub volume: u8,
    pub looping: bool,
}

impl PlaybackStatus {
    fn idle(config: &PlayerConfig) -> Self {
        Self {
            state: PlayerState::Stopped,
            src: None,
            position_seconds: 0.0,
            counters: FrameCounters::default(),
            output: None,
            dither: None,
            subtitle: None,
            volume: config.audio.volume,
            looping: config.loop_playback,
        }
    }
}

/// Cheap, cloneable command sender.
#[derive(Clone)]
pub struct PlayerHandle {
    commands: mpsc::UnboundedSender<PlayerCommand>,
    status: watch::Receiver<PlaybackStatus>,
}

impl PlayerHandle {
    pub fn send(&self, command: PlayerCommand) -> PlaybackResult<()> {
        self.commands
            .send(command)
            .map_err(|_| PlaybackError::PlayerClosed)
    }

    pub fn play(&self, src: impl Into<String>, start_seconds: f64) -> PlaybackResult<()> {
        self.send(PlayerCommand::Play {
            src: src.into(),
            start_seconds,
        })
    }

    pub fn pause(&self) -> PlaybackResult<()> {
        self.send(PlayerCommand::Pause)
    }

    pub fn resume(&self) -> PlaybackResult<()> {
        self.send(PlayerCommand::Resume)
    }

    pub fn toggle_pause(&self) -> PlaybackResult<()> {
        self.send(PlayerCommand::TogglePause)
    }

    pub fn seek(&self, seconds: f64) -> PlaybackResult<()> {
        self.send(PlayerCommand::Seek(seconds))
    }

    pub fn stop(&self) -> PlaybackResult<()> {
        self.send(PlayerCommand::Stop)
    }

    pub fn resize(&self, width: u32, height: u32) -> PlaybackResult<()> {
        self.send(PlayerCommand::Resize { width, height })
    }

    pub fn set_dither(&self, dither: DitherOverride) -> PlaybackResult<()> {
        self.send(PlayerCommand::SetDither(dither))
    }

    pub fn set_volume(&self, volume: u8) -> PlaybackResult<()> {
        self.send(PlayerCommand::SetVolume(volume))
    }

    pub fn set_loop(&self, enabled: bool) -> PlaybackResult<()> {
        self.send(PlayerCommand::SetLoop(enabled))
    }

    pub fn load_subtitles(&self, track: Option<SubtitleTrack>) -> PlaybackResult<()> {
        self.send(PlayerCommand::LoadSubtitles(track))
    }

    /// Run `draw` against the drawing layer on the player task.
    pub fn draw(&self, draw: impl FnOnce(&mut PixelLayer) + Send + 'static) -> PlaybackResult<()> {
        self.send(PlayerCommand::Draw(Box::new(draw)))
    }

    pub fn shutdown(&self) -> PlaybackResult<()> {
        self.send(PlayerCommand::Shutdown)
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.clone()
    }
}

pub struct Player;

impl Player {
    /// Start the player task. Must be called inside a tokio runtime.
    pub fn spawn<S: RenderSurface>(
        config: PlayerConfig,
        launcher: Arc<dyn ProcessLauncher>,
        surface: S,
        capability: ColorCapability,
    ) -> (
        PlayerHandle,
        mpsc::UnboundedReceiver<PlayerEvent>,
        JoinHandle<()>,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(PlaybackStatus::idle(&config));

        let (width, height) = surface.pixel_size();
        let mut compositor = LayerCompositor::new(width, height, capability);
        compositor.set_background(config.background);
        compositor.set_config_dither(config.dither);
        install_overlays(&mut compositor, &config);

        let subtitles = config
            .subtitles
            .path
            .as_deref()
            .and_then(|path| match SubtitleTrack::load(path) {
                Ok(track) => Some(track),
                Err(error) => {
                    tracing::warn!(code = error.code(), path = %path.display(), "{error}");
                    None
                }
            });

        let runtime = Runtime {
            loop_playback: config.loop_playback,
            volume: config.audio.volume,
            config,
            launcher,
            commands: command_rx,
            events: event_tx,
            status: status_tx,
            render: Some(RenderState {
                compositor,
                surface: Box::new(surface),
                last_dither: None,
            }),
            render_job: None,
            call_dither: DitherOverride::default(),
            subtitles,
            current_subtitle: None,
            pending_draws: Vec::new(),
            session: None,
            read_buf: vec![0; READ_CHUNK],
            audio_buf: vec![0; AUDIO_CHUNK],
        };
        let task = tokio::spawn(runtime.run());
        (
            PlayerHandle {
                commands: command_tx,
                status: status_rx,
            },
            event_rx,
            task,
        )
    }
}

fn install_overlays(compositor: &mut LayerCompositor, config: &PlayerConfig) {
    let mut bottom_rows = 0;
    if config.audio.waveform {
        bottom_rows = config.audio.waveform_rows;
        compositor.add_overlay(Box::new(WaveformOverlay::new(bottom_rows)));
    }
    if let Some(font) = config.subtitles.font.as_deref() {
        match SubtitleOverlay::from_path(font, config.subtitles.font_px) {
            Ok(overlay) => {
                compositor.add_overlay(Box::new(overlay.with_bottom_margin(bottom_rows)))
            }
            Err(error) => tracing::warn!(code = error.code(), "{error}; subtitles not drawn"),
        }
    }
}

struct RenderState {
    compositor: LayerCompositor,
    surface: Box<dyn RenderSurface>,
    last_dither: Option<DitherSettings>,
}

struct PendingFrame {
    frame: Frame,
    index: u64,
    deadline: Instant,
}

struct Session {
    src: String,
    source_dims: (u32, u32),
    start_offset: f64,
    output: OutputDimensions,
    decoder: DecoderProcessController,
    audio: AudioSidecarController,
    scheduler: FrameScheduler,
    decoder_out: Option<DecoderOutput>,
    audio_out: Option<ChildStdout>,
    pending: Option<PendingFrame>,
    eof: bool,
    /// When a decoder that closed its output gets terminated instead of reaped.
    exit_deadline: Option<Instant>,
    paused_at: Option<Instant>,
    terminal_signalled: bool,
}

impl Session {
    fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    fn position_seconds(&self, now: Instant) -> f64 {
        self.start_offset + self.scheduler.elapsed(now).as_secs_f64()
    }
}

enum Flow {
    Continue,
    Exit,
}

struct Runtime {
    config: PlayerConfig,
    launcher: Arc<dyn ProcessLauncher>,
    commands: mpsc::UnboundedReceiver<PlayerCommand>,
    events: mpsc::UnboundedSender<PlayerEvent>,
    status: watch::Sender<PlaybackStatus>,
    render: Option<RenderState>,
    render_job: Option<JoinHandle<RenderState>>,
    call_dither: DitherOverride,
    subtitles: Option<SubtitleTrack>,
    current_subtitle: Option<String>,
    pending_draws: Vec<DrawFn>,
    loop_playback: bool,
    volume: u8,
    session: Option<Session>,
    read_buf: Vec<u8>,
    audio_buf: Vec<u8>,
}

async fn read_from(stream: Option<&mut ChildStdout>, buf: &mut [u8]) -> io::Result<usize> {
    match stream {
        Some(stream) => stream.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn finish_decoder(
    decoder: Option<&mut DecoderProcessController>,
    deadline: Instant,
) -> PlaybackResult<()> {
    match decoder {
        Some(decoder) => decoder.finish(deadline).await,
        None => std::future::pending().await,
    }
}

async fn join_render(job: &mut Option<JoinHandle<RenderState>>) -> Result<RenderState, JoinError> {
    match job.as_mut() {
        Some(job) => job.await,
        None => std::future::pending().await,
    }
}

impl Runtime {
    async fn run(mut self) {
        tracing::debug!(launcher = self.launcher.label(), "player task started");
        loop {
            let render_busy = self.render_job.is_some();
            let (deadline, read_len, read_audio, exit_deadline) = match self.session.as_ref() {
                Some(session) => {
                    let paused = session.is_paused();
                    let deadline = session
                        .pending
                        .as_ref()
                        .filter(|_| !paused && !render_busy)
                        .map(|pending| pending.deadline);
                    let read_len = if !paused && session.pending.is_none() && !session.eof {
                        session.scheduler.bytes_needed().min(READ_CHUNK)
                    } else {
                        0
                    };
                    let drained = session.eof
                        && session.pending.is_none()
                        && !session.terminal_signalled
                        && !paused
                        && !render_busy;
                    let exit_deadline = session.exit_deadline.filter(|_| drained);
                    (
                        deadline,
                        read_len,
                        !paused && session.audio_out.is_some(),
                        exit_deadline,
                    )
                }
                None => (None, 0, false, None),
            };
            let sleep_target = tokio::time::Instant::from_std(deadline.unwrap_or_else(Instant::now));
            let (decoder_out, audio_out, decoder) = match self.session.as_mut() {
                Some(session) => (
                    session.decoder_out.as_mut(),
                    session.audio_out.as_mut(),
                    Some(&mut session.decoder),
                ),
                None => (None, None, None),
            };
            let read_decoder = read_len > 0 && decoder_out.is_some();
            let awaiting_exit = exit_deadline.is_some();

            let flow = tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => Flow::Exit,
                },
                joined = join_render(&mut self.render_job), if render_busy => {
                    self.render_job = None;
                    self.on_render_done(joined)
                }
                _ = tokio::time::sleep_until(sleep_target), if deadline.is_some() => {
                    self.dispatch_pending();
                    Flow::Continue
                }
                read = read_from(decoder_out, &mut self.read_buf[..read_len]), if read_decoder => {
                    self.on_decoder_read(read).await;
                    Flow::Continue
                }
                read = read_from(audio_out, &mut self.audio_buf), if read_audio => {
                    self.on_audio_read(read).await;
                    Flow::Continue
                }
                finished = finish_decoder(decoder, exit_deadline.unwrap_or_else(Instant::now)), if awaiting_exit => {
                    self.on_decoder_finished(finished).await;
                    Flow::Continue
                }
            };
            if matches!(flow, Flow::Exit) {
                break;
            }
        }

        self.stop_session().await;
        self.settle_render().await;
        self.publish();
        tracing::debug!("player task finished");
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        let now = Instant::now();
        let (state, src, position_seconds, counters, output) = match self.session.as_ref() {
            Some(session) => (
                if session.is_paused() {
                    PlayerState::Paused
                } else {
                    PlayerState::Playing
                },
                Some(session.src.clone()),
                session.position_seconds(now),
                session.scheduler.counters(),
                Some(session.output),
            ),
            None => (PlayerState::Stopped, None, 0.0, FrameCounters::default(), None),
        };
        let previous_dither = self.status.borrow().dither;
        let dither = self
            .render
            .as_ref()
            .and_then(|render| render.last_dither)
            .or(previous_dither);
        self.status.send_replace(PlaybackStatus {
            state,
            src,
            position_seconds,
            counters,
            output,
            dither,
            subtitle: self.current_subtitle.clone(),
            volume: self.volume,
            looping: self.loop_playback,
        });
    }

    fn set_state(&self, state: PlayerState) {
        self.status.send_modify(|status| status.state = state);
    }

    async fn handle_command(&mut self, command: PlayerCommand) -> Flow {
        tracing::debug!(?command, "player command");
        match command {
            PlayerCommand::Play { src, start_seconds } => {
                self.start_session(src, start_seconds.max(0.0), false, None)
                    .await;
            }
            PlayerCommand::Pause => self.pause(),
            PlayerCommand::Resume => self.resume(),
            PlayerCommand::TogglePause => match self.session.as_ref().map(Session::is_paused) {
                Some(true) => self.resume(),
                Some(false) => self.pause(),
                None => {}
            },
            PlayerCommand::Seek(seconds) => self.restart_session(Some(seconds.max(0.0))).await,
            PlayerCommand::Stop => {
                let was_active = self.session.is_some();
                self.stop_session().await;
                if was_active {
                    self.emit(PlayerEvent::Stopped);
                }
                self.publish();
            }
            PlayerCommand::Resize { width, height } => self.resize(width, height).await,
            PlayerCommand::SetDither(dither) => {
                self.call_dither = dither;
                self.redraw_if_idle();
            }
            PlayerCommand::SetVolume(volume) => {
                self.volume = volume.min(100);
                self.config.audio.volume = self.volume;
                let now = Instant::now();
                if let Some(session) = self.session.as_mut() {
                    let position = session.position_seconds(now);
                    session.audio.set_volume(self.volume, position).await;
                }
                self.publish();
            }
            PlayerCommand::SetLoop(enabled) => {
                self.loop_playback = enabled;
                self.publish();
            }
            PlayerCommand::LoadSubtitles(track) => {
                self.subtitles = track;
                let position = self
                    .session
                    .as_ref()
                    .map(|session| session.position_seconds(Instant::now()));
                self.refresh_subtitle(position);
                self.redraw_if_idle();
            }
            PlayerCommand::Draw(draw) => {
                self.pending_draws.push(draw);
                self.redraw_if_idle();
            }
            PlayerCommand::Shutdown => {
                let was_active = self.session.is_some();
                self.stop_session().await;
                if was_active {
                    self.emit(PlayerEvent::Stopped);
                }
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    /// Tear down the current session, waiting for every process to exit.
    async fn stop_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.set_state(PlayerState::Stopping);
        session.scheduler.abort();
        session.decoder_out = None;
        session.audio_out = None;
        session.decoder.stop().await;
        session.audio.stop().await;
        tracing::debug!(
            src = %session.src,
            decoded = session.scheduler.counters().decoded,
            rendered = session.scheduler.counters().rendered,
            skipped = session.scheduler.counters().skipped,
            "session stopped"
        );
    }

    /// Wait for an in-flight render job and take the render state back.
    async fn settle_render(&mut self) {
        if let Some(job) = self.render_job.take() {
            let joined = job.await;
            self.on_render_done(joined);
        }
    }

    async fn start_session(
        &mut self,
        src: String,
        start_seconds: f64,
        paused: bool,
        known_dims: Option<(u32, u32)>,
    ) {
        self.stop_session().await;
        self.settle_render().await;
        let Some(render) = self.render.as_mut() else {
            self.emit(PlayerEvent::Error(PlaybackError::PlayerClosed));
            return;
        };
        render.compositor.clear_frame();
        let (surface_w, surface_h) = render.surface.pixel_size();

        let grace = self.config.stop_grace();
        let mut decoder = DecoderProcessController::new(self.launcher.clone(), grace);
        let source_dims = match known_dims {
            Some(dims) => dims,
            None => decoder.probe_dimensions(&src).await,
        };
        let output = compute_output_dimensions(
            source_dims.0,
            source_dims.1,
            surface_w,
            surface_h,
            self.config.pixel_aspect_ratio,
        );
        let request = DecodeRequest {
            src: src.clone(),
            start_seconds,
            width: output.width,
            height: output.height,
            fps: self.config.fps,
        };
        let decoder_out = match decoder.start(&request).await {
            Ok(stdout) => stdout,
            Err(error) => {
                tracing::error!(code = error.code(), "{error}");
                self.emit(PlayerEvent::Error(error));
                self.publish();
                return;
            }
        };

        let mut audio_config = self.config.audio.clone();
        audio_config.volume = self.volume;
        let mut audio = AudioSidecarController::new(self.launcher.clone(), grace, audio_config);
        audio.start(&src, start_seconds).await;
        let audio_out = audio.take_sample_stream();

        let mut scheduler = FrameScheduler::new(output.width, output.height, self.config.fps);
        let now = Instant::now();
        scheduler.start(now);

        let mut session = Session {
            src: src.clone(),
            source_dims,
            start_offset: start_seconds,
            output,
            decoder,
            audio,
            scheduler,
            decoder_out: Some(decoder_out),
            audio_out,
            pending: None,
            eof: false,
            exit_deadline: None,
            paused_at: None,
            terminal_signalled: false,
        };
        if paused {
            pause_session(&mut session, now);
        }
        self.session = Some(session);
        self.emit(PlayerEvent::Started {
            src,
            output,
            start_seconds,
        });
        if paused {
            self.emit(PlayerEvent::Paused {
                position_seconds: start_seconds,
            });
        }
        self.publish();
    }

    /// Restart the current source at `at` (or the current position), keeping
    /// pause state. Used for seek and resize.
    async fn restart_session(&mut self, at: Option<f64>) {
        let now = Instant::now();
        let Some(session) = self.session.as_ref() else {
            tracing::debug!("nothing playing, restart ignored");
            return;
        };
        let src = session.src.clone();
        let dims = session.source_dims;
        let paused = session.is_paused();
        let position = at.unwrap_or_else(|| session.position_seconds(now));
        self.start_session(src, position, paused, Some(dims)).await;
    }

    async fn resize(&mut self, width: u32, height: u32) {
        let now = Instant::now();
        let resume_at = self.session.as_ref().map(|session| {
            (
                session.src.clone(),
                session.source_dims,
                session.is_paused(),
                session.position_seconds(now),
            )
        });
        self.stop_session().await;
        self.settle_render().await;
        if let Some(render) = self.render.as_mut() {
            render.surface.resize(width, height);
            let (width, height) = render.surface.pixel_size();
            render.compositor.resize(width, height);
            tracing::debug!(width, height, "surface resized");
        }
        match resume_at {
            Some((src, dims, paused, position)) => {
                self.start_session(src, position, paused, Some(dims)).await;
            }
            None => {
                self.redraw_if_idle();
                self.publish();
            }
        }
    }

    fn pause(&mut self) {
        let now = Instant::now();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.is_paused() {
            return;
        }
        pause_session(session, now);
        let position_seconds = session.position_seconds(now);
        self.emit(PlayerEvent::Paused { position_seconds });
        self.publish();
    }

    fn resume(&mut self) {
        let now = Instant::now();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(paused_at) = session.paused_at.take() else {
            return;
        };
        let paused_for = session
            .scheduler
            .resume(now)
            .unwrap_or_else(|| now.saturating_duration_since(paused_at));
        if let Some(pending) = session.pending.as_mut() {
            pending.deadline += paused_for;
        }
        if let Some(deadline) = session.exit_deadline.as_mut() {
            *deadline += paused_for;
        }
        session.decoder.resume();
        session.audio.resume();
        let position_seconds = session.position_seconds(now);
        tracing::debug!(paused_ms = paused_for.as_millis() as u64, "resumed");
        self.emit(PlayerEvent::Resumed { position_seconds });
        self.publish();
    }

    async fn on_decoder_read(&mut self, read: io::Result<usize>) {
        let grace = self.config.stop_grace();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match read {
            Ok(0) => {
                session.eof = true;
                session.decoder_out = None;
                session.exit_deadline = Some(Instant::now() + grace);
            }
            Ok(len) => {
                let now = Instant::now();
                match session.scheduler.push_bytes(&self.read_buf[..len], now) {
                    Some(FrameOutcome::Render {
                        frame,
                        index,
                        delay,
                    }) => {
                        session.pending = Some(PendingFrame {
                            frame,
                            index,
                            deadline: now + delay,
                        });
                        if delay.is_zero() && self.render_job.is_none() {
                            self.dispatch_pending();
                        }
                    }
                    Some(FrameOutcome::Skipped { .. }) => self.publish(),
                    None => {}
                }
            }
            Err(source) => {
                let error = PlaybackError::StreamRead {
                    process: ProcessKind::Decoder.label(),
                    source,
                };
                self.fail_session(error).await;
            }
        }
    }

    async fn on_audio_read(&mut self, read: io::Result<usize>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match read {
            Ok(0) => {
                session.audio_out = None;
                session.audio.on_extractor_eof().await;
            }
            Ok(len) => session.audio.ingest(&self.audio_buf[..len]),
            Err(error) => {
                tracing::warn!(
                    process = ProcessKind::AudioExtractor.label(),
                    %error,
                    "sample stream failed; waveform frozen"
                );
                session.audio_out = None;
            }
        }
    }

    /// Send the pending frame to the blocking pool for compositing.
    fn dispatch_pending(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(pending) = session.pending.take() else {
            return;
        };
        let Some(mut render) = self.render.take() else {
            session.pending = Some(pending);
            return;
        };

        let position = session.start_offset
            + session.scheduler.media_time(pending.index).as_secs_f64();
        let columns = render.compositor.size().0 as usize;
        if let Some(peaks) = session.audio.waveform_peaks(columns) {
            render.compositor.set_waveform_peaks(peaks);
        }
        if let Some(buffer) = render.compositor.set_frame(pending.frame) {
            session.scheduler.recycle(buffer);
        }
        tracing::trace!(frame = pending.index, position, "compositing");

        self.render = Some(render);
        self.refresh_subtitle(Some(position));
        self.start_render_job();
        self.publish();
    }

    /// Apply queued draws and composite onto the surface off-thread.
    fn start_render_job(&mut self) {
        let Some(mut render) = self.render.take() else {
            return;
        };
        for draw in self.pending_draws.drain(..) {
            draw(render.compositor.drawing_layer_mut());
        }
        let call = self.call_dither;
        self.render_job = Some(tokio::task::spawn_blocking(move || {
            let RenderState {
                compositor,
                surface,
                ..
            } = &mut render;
            let settings = compositor.present(surface.as_mut(), &call);
            render.last_dither = Some(settings);
            render
        }));
    }

    fn on_render_done(&mut self, joined: Result<RenderState, JoinError>) -> Flow {
        match joined {
            Ok(render) => {
                self.render = Some(render);
                if let Some(session) = self.session.as_mut() {
                    session.scheduler.finish_render();
                }
                if !self.pending_draws.is_empty() {
                    self.redraw_if_idle();
                }
                self.publish();
                Flow::Continue
            }
            Err(error) => {
                tracing::error!(%error, "render job failed; surface lost");
                self.emit(PlayerEvent::Error(PlaybackError::PlayerClosed));
                Flow::Exit
            }
        }
    }

    /// Re-composite without a new frame when no frames are flowing.
    fn redraw_if_idle(&mut self) {
        let idle = self.session.as_ref().map_or(true, Session::is_paused);
        if idle && self.render_job.is_none() {
            self.start_render_job();
        }
    }

    fn refresh_subtitle(&mut self, position: Option<f64>) {
        let text = match (self.subtitles.as_ref(), position) {
            (Some(track), Some(position)) => track
                .find_active_cue(position)
                .map(|cue| cue.text.clone()),
            _ => None,
        };
        if text == self.current_subtitle {
            return;
        }
        if let Some(render) = self.render.as_mut() {
            render.compositor.set_subtitle_text(text.as_deref());
        }
        self.current_subtitle = text.clone();
        self.emit(PlayerEvent::SubtitleChanged { text });
    }

    /// The decoder drained its output and exited (or was terminated at the deadline).
    async fn on_decoder_finished(&mut self, finished: PlaybackResult<()>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.scheduler.end();
        let counters = session.scheduler.counters();
        match finished {
            Ok(()) => {
                tracing::info!(
                    decoded = counters.decoded,
                    rendered = counters.rendered,
                    skipped = counters.skipped,
                    "end of stream"
                );
                if self.loop_playback {
                    let src = session.src.clone();
                    let dims = session.source_dims;
                    let paused = session.is_paused();
                    self.emit(PlayerEvent::Looped);
                    self.start_session(src, 0.0, paused, Some(dims)).await;
                } else {
                    session.terminal_signalled = true;
                    self.emit(PlayerEvent::Ended { counters });
                    self.stop_session().await;
                    self.refresh_subtitle(None);
                    self.publish();
                }
            }
            Err(error) => self.fail_session(error).await,
        }
    }

    /// Report a fatal session error once and tear the session down.
    async fn fail_session(&mut self, error: PlaybackError) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.terminal_signalled {
            tracing::debug!(code = error.code(), "{error} (already signalled)");
            return;
        }
        session.terminal_signalled = true;
        tracing::error!(code = error.code(), "{error}");
        self.emit(PlayerEvent::Error(error));
        self.stop_session().await;
        self.publish();
    }
}

fn pause_session(session: &mut Session, now: Instant) {
    session.paused_at = Some(now);
    session.scheduler.pause(now);
    session.decoder.suspend();
    session.audio.pause();
}
