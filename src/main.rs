mod terminal;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ttyvid::config::{resolve_bool_override, ENV_LOOP};
use ttyvid::decoding::DecoderProcessController;
use ttyvid::geometry::{compute_output_dimensions, OutputDimensions};
use ttyvid::subtitle::SubtitleTrack;
use ttyvid::{
    ColorCapability, DitherChoice, DitherMode, FfmpegLauncher, MemorySurface, PlaybackError,
    Player, PlayerConfig, PlayerEvent, PlayerHandle, Quantizer,
};

use crate::terminal::{spawn_key_reader, TerminalGuard, TerminalSurface};

const LOG_ENV: &str = "TTYVID_LOG";

#[derive(Debug, Parser)]
#[command(name = "ttyvid")]
#[command(about = "Play video in the terminal through dithered half-block pixels")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("TTYVID_GIT_HASH"), ")"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Play a file or URL.
    Play(PlayArgs),
    /// Print source dimensions and the output size for a surface.
    Probe {
        src: String,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Surface size in pixels; defaults to the current terminal.
        #[arg(long, value_parser = parse_size)]
        size: Option<(u32, u32)>,
        #[arg(long)]
        json: bool,
    },
    /// Dither a still image, mostly for comparing modes.
    Dither {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value = "floyd-steinberg")]
        mode: DitherMode,
        #[arg(long, default_value_t = 1)]
        bits: u8,
    },
    /// List the cues of a SubRip file, or the one active at `--at`.
    Subs {
        file: PathBuf,
        #[arg(long)]
        at: Option<f64>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
struct PlayArgs {
    src: String,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Dither mode keyword or `auto`.
    #[arg(long)]
    dither: Option<DitherChoice>,
    #[arg(long)]
    bits: Option<u8>,
    #[arg(long)]
    fps: Option<f64>,
    #[arg(long = "loop", conflicts_with = "no_loop")]
    loop_playback: bool,
    #[arg(long)]
    no_loop: bool,
    /// Start offset in seconds.
    #[arg(long, default_value_t = 0.0)]
    start: f64,
    #[arg(long)]
    volume: Option<u8>,
    #[arg(long)]
    subtitles: Option<PathBuf>,
    /// Font used to draw subtitle cues.
    #[arg(long)]
    font: Option<PathBuf>,
    #[arg(long)]
    waveform: bool,
    #[arg(long)]
    no_audio: bool,
    /// Render into memory at WxH instead of the terminal and print the final status.
    #[arg(long, value_parser = parse_size)]
    headless: Option<(u32, u32)>,
}

impl PlayArgs {
    fn loop_flag(&self) -> Option<bool> {
        match (self.loop_playback, self.no_loop) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(|c: char| c == 'x' || c == 'X')
        .ok_or_else(|| format!("expected WxH, got '{value}'"))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| format!("invalid dimension '{part}'"))
    };
    Ok((parse(w)?, parse(h)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Play(args) => run_play(args).await,
        Commands::Probe {
            src,
            config,
            size,
            json,
        } => run_probe(&src, config.as_deref(), size, json).await,
        Commands::Dither {
            input,
            output,
            mode,
            bits,
        } => run_dither(&input, &output, mode, bits),
        Commands::Subs { file, at, json } => run_subs(&file, at, json),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// File, then environment, then command line.
fn load_config(path: Option<&Path>) -> Result<PlayerConfig> {
    let mut config = match path {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn build_play_config(args: &PlayArgs) -> Result<PlayerConfig> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(mode) = args.dither {
        config.dither.mode = Some(mode);
    }
    if let Some(bits) = args.bits {
        config.dither.bits = Some(bits);
    }
    if let Some(fps) = args.fps {
        config.fps = fps;
    }
    if let Some(enabled) = resolve_bool_override(args.loop_flag(), std::env::var(ENV_LOOP).ok()) {
        config.loop_playback = enabled;
    }
    if let Some(volume) = args.volume {
        config.audio.volume = volume;
    }
    if args.subtitles.is_some() {
        config.subtitles.path = args.subtitles.clone();
    }
    if args.font.is_some() {
        config.subtitles.font = args.font.clone();
    }
    if args.waveform {
        config.audio.waveform = true;
    }
    if args.no_audio {
        config.audio.playback = false;
        config.audio.waveform = false;
    }
    config.validate()?;
    Ok(config)
}

async fn run_play(args: PlayArgs) -> Result<()> {
    let config = build_play_config(&args)?;
    let launcher = Arc::new(FfmpegLauncher::new(config.tools.clone()));

    if let Some((width, height)) = args.headless {
        let surface = MemorySurface::new(width, height);
        let (handle, events, task) =
            Player::spawn(config, launcher, surface, ColorCapability::TrueColor);
        handle.play(args.src.clone(), args.start)?;
        let outcome = drive(&handle, events).await;
        let status = handle.status();
        task.await.context("player task panicked")?;
        println!("{}", serde_json::to_string_pretty(&status)?);
        return outcome;
    }

    let capability = ColorCapability::detect();
    let (cols, rows) = crossterm::terminal::size().context("failed to read terminal size")?;
    let surface = TerminalSurface::new(cols, rows, capability);
    tracing::info!(capability = capability.label(), cols, rows, "terminal surface");

    let guard = TerminalGuard::enter().context("failed to enter raw mode")?;
    let (handle, events, task) = Player::spawn(config, launcher, surface, capability);
    let stop_keys = Arc::new(AtomicBool::new(false));
    let keys = spawn_key_reader(handle.clone(), stop_keys.clone())?;

    handle.play(args.src.clone(), args.start)?;
    let outcome = drive(&handle, events).await;

    task.await.context("player task panicked")?;
    stop_keys.store(true, Ordering::Relaxed);
    if keys.join().is_err() {
        tracing::debug!("key reader panicked");
    }
    drop(guard);
    outcome
}

/// Consume events until the player exits. Ends or fails the run on the first
/// terminal event.
async fn drive(
    handle: &PlayerHandle,
    mut events: tokio::sync::mpsc::UnboundedReceiver<PlayerEvent>,
) -> Result<()> {
    let mut failure: Option<PlaybackError> = None;
    while let Some(event) = events.recv().await {
        match event {
            PlayerEvent::Started {
                src,
                output,
                start_seconds,
            } => {
                tracing::info!(%src, width = output.width, height = output.height, start_seconds, "started");
            }
            PlayerEvent::Ended { counters } => {
                tracing::info!(
                    rendered = counters.rendered,
                    skipped = counters.skipped,
                    "playback ended"
                );
                let _ = handle.shutdown();
            }
            PlayerEvent::Error(error) => {
                tracing::error!(code = error.code(), "{error}");
                failure.get_or_insert(error);
                let _ = handle.shutdown();
            }
            other => tracing::debug!(event = ?other, "player event"),
        }
    }
    match failure {
        Some(error) => Err(anyhow!(error).context("playback failed")),
        None => Ok(()),
    }
}

#[derive(Debug, Serialize)]
struct ProbeReport<'a> {
    src: &'a str,
    source_width: u32,
    source_height: u32,
    surface_width: u32,
    surface_height: u32,
    output: OutputDimensions,
}

async fn run_probe(
    src: &str,
    config_path: Option<&Path>,
    size: Option<(u32, u32)>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let launcher = Arc::new(FfmpegLauncher::new(config.tools.clone()));
    let decoder = DecoderProcessController::new(launcher, config.stop_grace());
    let (source_width, source_height) = decoder.probe_dimensions(src).await;

    let (surface_width, surface_height) = match size {
        Some(size) => size,
        None => {
            let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
            terminal::pixel_size_for_cells(cols, rows)
        }
    };
    let output = compute_output_dimensions(
        source_width,
        source_height,
        surface_width,
        surface_height,
        config.pixel_aspect_ratio,
    );
    let report = ProbeReport {
        src,
        source_width,
        source_height,
        surface_width,
        surface_height,
        output,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}: {}x{} -> {}x{} on a {}x{} surface",
            src,
            source_width,
            source_height,
            output.width,
            output.height,
            surface_width,
            surface_height
        );
    }
    Ok(())
}

fn run_dither(input: &Path, output: &Path, mode: DitherMode, bits: u8) -> Result<()> {
    let image = image::open(input)
        .with_context(|| format!("failed to open {}", input.display()))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    let mut rgba = image.into_raw();
    Quantizer::new().apply(&mut rgba, width, height, bits, mode);

    let buffer = image::RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| anyhow!("dithered buffer has the wrong size"))?;
    let keeps_alpha = output
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| !matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg"));
    let saved = if keeps_alpha {
        buffer.save(output)
    } else {
        image::DynamicImage::ImageRgba8(buffer).to_rgb8().save(output)
    };
    saved.with_context(|| format!("failed to write {}", output.display()))?;
    println!("Wrote {} ({mode}, {bits} bit)", output.display());
    Ok(())
}

fn run_subs(file: &Path, at: Option<f64>, json: bool) -> Result<()> {
    let track = SubtitleTrack::load(file)?;
    if let Some(seconds) = at {
        if !(seconds.is_finite() && seconds >= 0.0) {
            bail!("--at must be a non-negative number of seconds");
        }
        let cue = track.find_active_cue(seconds);
        if json {
            println!("{}", serde_json::to_string_pretty(&cue)?);
        } else if let Some(cue) = cue {
            println!("{}", cue.text);
        }
        return Ok(());
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&track)?);
        return Ok(());
    }
    for cue in track.cues() {
        println!(
            "{:>4}  {:>9.3} --> {:>9.3}  {}",
            cue.index,
            cue.start,
            cue.end,
            cue.text.replace('\n', " / ")
        );
    }
    println!("{} cues", track.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_arguments_parse() {
        assert_eq!(parse_size("160x120"), Ok((160, 120)));
        assert_eq!(parse_size("80X48"), Ok((80, 48)));
        assert!(parse_size("0x10").is_err());
        assert!(parse_size("wide").is_err());
    }

    #[test]
    fn play_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "ttyvid",
            "play",
            "clip.mp4",
            "--dither",
            "sierra-stable",
            "--bits",
            "3",
            "--no-loop",
            "--no-audio",
        ])
        .unwrap();
        let Commands::Play(args) = cli.command else {
            panic!("expected play");
        };
        assert_eq!(args.loop_flag(), Some(false));
        let config = build_play_config(&args).unwrap();
        assert_eq!(
            config.dither.mode,
            Some(DitherChoice::Mode(DitherMode::SierraStable))
        );
        assert_eq!(config.dither.bits, Some(3));
        assert!(!config.loop_playback);
        assert!(!config.audio.playback);
    }

    #[test]
    fn loop_flags_conflict() {
        assert!(Cli::try_parse_from(["ttyvid", "play", "a.mp4", "--loop", "--no-loop"]).is_err());
    }

    #[test]
    fn unknown_dither_mode_is_rejected() {
        assert!(Cli::try_parse_from(["ttyvid", "dither", "a.png", "b.png", "--mode", "swirl"]).is_err());
    }
}
