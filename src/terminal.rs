//! Minimal half-block terminal surface and key handling for the CLI.
//!
//! Each character cell shows two vertically stacked pixels with `▀`: the upper
//! one as foreground, the lower one as background.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{execute, queue};

use ttyvid::surface::{unpack_rgba, RenderSurface};
use ttyvid::{ColorCapability, PlaybackStatus, PlayerCommand, PlayerHandle};

const KEY_POLL: Duration = Duration::from_millis(100);
const SEEK_STEP_SECONDS: f64 = 5.0;
const VOLUME_STEP: u8 = 10;
const HALF_BLOCK: char = '▀';

/// Standard xterm values for the 16 ANSI colors.
const ANSI16: [[u8; 3]; 16] = [
    [0, 0, 0],
    [205, 0, 0],
    [0, 205, 0],
    [205, 205, 0],
    [0, 0, 238],
    [205, 0, 205],
    [0, 205, 205],
    [229, 229, 229],
    [127, 127, 127],
    [255, 0, 0],
    [0, 255, 0],
    [255, 255, 0],
    [92, 92, 255],
    [255, 0, 255],
    [0, 255, 255],
    [255, 255, 255],
];

/// Pixel size of a terminal with `cols` × `rows` cells.
pub fn pixel_size_for_cells(cols: u16, rows: u16) -> (u32, u32) {
    (u32::from(cols), u32::from(rows) * 2)
}

pub struct TerminalSurface {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
    capability: ColorCapability,
    dirty: bool,
    out: Vec<u8>,
}

impl TerminalSurface {
    pub fn new(cols: u16, rows: u16, capability: ColorCapability) -> Self {
        let (width, height) = pixel_size_for_cells(cols, rows);
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
            capability,
            dirty: false,
            out: Vec::new(),
        }
    }

    fn color(&self, word: u32) -> Color {
        let [r, g, b, a] = unpack_rgba(word);
        if a == 0 {
            return Color::Black;
        }
        map_color(self.capability, r, g, b)
    }

    fn encode_frame(&mut self) -> io::Result<()> {
        self.out.clear();
        let width = self.width as usize;
        let rows = self.height / 2;
        let mut out = std::mem::take(&mut self.out);
        let mut last: Option<(Color, Color)> = None;
        for row in 0..rows {
            queue!(out, MoveTo(0, row as u16))?;
            let top_row = (row as usize * 2) * width;
            let bottom_row = top_row + width;
            for col in 0..width {
                let fg = self.color(self.pixels[top_row + col]);
                let bg = self.color(self.pixels[bottom_row + col]);
                if last.map_or(true, |(last_fg, _)| last_fg != fg) {
                    queue!(out, SetForegroundColor(fg))?;
                }
                if last.map_or(true, |(_, last_bg)| last_bg != bg) {
                    queue!(out, SetBackgroundColor(bg))?;
                }
                last = Some((fg, bg));
                queue!(out, Print(HALF_BLOCK))?;
            }
        }
        queue!(out, ResetColor)?;
        self.out = out;
        Ok(())
    }
}

impl RenderSurface for TerminalSurface {
    fn pixel_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn image_color_buffer_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        // Half blocks: always an even number of pixel rows.
        self.height = height & !1;
        self.pixels.clear();
        self.pixels
            .resize(self.width as usize * self.height as usize, 0);
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn request_render(&mut self) {
        if !std::mem::take(&mut self.dirty) {
            return;
        }
        let result = self.encode_frame().and_then(|()| {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&self.out)?;
            stdout.flush()
        });
        if let Err(error) = result {
            tracing::debug!(%error, "terminal write failed");
        }
    }
}

pub fn map_color(capability: ColorCapability, r: u8, g: u8, b: u8) -> Color {
    match capability {
        ColorCapability::TrueColor => Color::Rgb { r, g, b },
        ColorCapability::Ansi256 => Color::AnsiValue(ansi256(r, g, b)),
        ColorCapability::Ansi16 => Color::AnsiValue(ansi16(r, g, b)),
        ColorCapability::Monochrome => {
            let luma = 299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b);
            if luma >= 128_000 {
                Color::White
            } else {
                Color::Black
            }
        }
    }
}

/// Index into the 6×6×6 color cube of the 256-color palette.
pub fn ansi256(r: u8, g: u8, b: u8) -> u8 {
    let level = |v: u8| ((u16::from(v) * 5 + 127) / 255) as u8;
    16 + 36 * level(r) + 6 * level(g) + level(b)
}

pub fn ansi16(r: u8, g: u8, b: u8) -> u8 {
    let distance = |c: &[u8; 3]| {
        let dr = i32::from(r) - i32::from(c[0]);
        let dg = i32::from(g) - i32::from(c[1]);
        let db = i32::from(b) - i32::from(c[2]);
        dr * dr + dg * dg + db * db
    };
    ANSI16
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| distance(c))
        .map_or(0, |(idx, _)| idx as u8)
}

/// Raw mode + alternate screen for the lifetime of the guard.
pub struct TerminalGuard;

impl TerminalGuard {
    pub fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen, Hide)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), ResetColor, Show, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

/// Translate a terminal event into a player command.
pub fn command_for_event(event: &Event, status: &PlaybackStatus) -> Option<PlayerCommand> {
    match event {
        Event::Resize(cols, rows) => {
            let (width, height) = pixel_size_for_cells(*cols, *rows);
            Some(PlayerCommand::Resize { width, height })
        }
        Event::Key(key) if key.kind == KeyEventKind::Press => command_for_key(key, status),
        _ => None,
    }
}

fn command_for_key(key: &KeyEvent, status: &PlaybackStatus) -> Option<PlayerCommand> {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(PlayerCommand::Shutdown)
        }
        KeyCode::Char('q') | KeyCode::Esc => Some(PlayerCommand::Shutdown),
        KeyCode::Char(' ') => Some(PlayerCommand::TogglePause),
        KeyCode::Right => Some(PlayerCommand::Seek(
            status.position_seconds + SEEK_STEP_SECONDS,
        )),
        KeyCode::Left => Some(PlayerCommand::Seek(
            (status.position_seconds - SEEK_STEP_SECONDS).max(0.0),
        )),
        KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Up => Some(PlayerCommand::SetVolume(
            status.volume.saturating_add(VOLUME_STEP).min(100),
        )),
        KeyCode::Char('-') | KeyCode::Down => Some(PlayerCommand::SetVolume(
            status.volume.saturating_sub(VOLUME_STEP),
        )),
        KeyCode::Char('l') => Some(PlayerCommand::SetLoop(!status.looping)),
        _ => None,
    }
}

/// Forward key presses and resizes to `handle` until `stop` is set or the player
/// goes away.
pub fn spawn_key_reader(handle: PlayerHandle, stop: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("ttyvid-keys".to_owned())
        .spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                match event::poll(KEY_POLL) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(error) => {
                        tracing::debug!(%error, "event poll failed");
                        break;
                    }
                }
                let event = match event::read() {
                    Ok(event) => event,
                    Err(error) => {
                        tracing::debug!(%error, "event read failed");
                        break;
                    }
                };
                let Some(command) = command_for_event(&event, &handle.status()) else {
                    continue;
                };
                if handle.send(command).is_err() {
                    break;
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ttyvid::player::PlayerState;
    use ttyvid::scheduler::FrameCounters;

    fn status(position_seconds: f64, volume: u8) -> PlaybackStatus {
        PlaybackStatus {
            state: PlayerState::Playing,
            src: Some("clip.mp4".to_owned()),
            position_seconds,
            counters: FrameCounters::default(),
            output: None,
            dither: None,
            subtitle: None,
            volume,
            looping: false,
        }
    }

    fn press(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn palette_mapping() {
        assert_eq!(ansi256(0, 0, 0), 16);
        assert_eq!(ansi256(255, 255, 255), 231);
        assert_eq!(ansi256(255, 0, 0), 196);
        assert_eq!(ansi16(250, 10, 10), 9);
        assert_eq!(ansi16(10, 10, 10), 0);
        assert_eq!(
            map_color(ColorCapability::Monochrome, 128, 128, 128),
            Color::White
        );
    }

    #[test]
    fn keys_map_to_commands() {
        let now = status(3.0, 95);
        assert!(matches!(
            command_for_event(&press(KeyCode::Char(' ')), &now),
            Some(PlayerCommand::TogglePause)
        ));
        assert!(matches!(
            command_for_event(&press(KeyCode::Left), &now),
            Some(PlayerCommand::Seek(seconds)) if seconds == 0.0
        ));
        assert!(matches!(
            command_for_event(&press(KeyCode::Char('+')), &now),
            Some(PlayerCommand::SetVolume(100))
        ));
        assert!(matches!(
            command_for_event(&Event::Resize(80, 24), &now),
            Some(PlayerCommand::Resize {
                width: 80,
                height: 48
            })
        ));
        assert!(command_for_event(&press(KeyCode::Char('x')), &now).is_none());
    }

    #[test]
    fn surface_keeps_even_rows() {
        let mut surface = TerminalSurface::new(4, 2, ColorCapability::TrueColor);
        assert_eq!(surface.pixel_size(), (4, 4));
        surface.resize(5, 7);
        assert_eq!(surface.pixel_size(), (5, 6));
        assert_eq!(surface.image_color_buffer_mut().len(), 30);
    }
}
