//! Assembles decoder bytes into frames and paces them against the wall clock.
//!
//! The scheduler never sleeps or reads by itself: the caller feeds it bytes and
//! the current [`Instant`], and gets back a decision for every completed frame.
//! That keeps it deterministic under a simulated clock.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::PlaybackError;
use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Decoding,
    Paused,
    Ended,
    Aborted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameCounters {
    pub decoded: u64,
    pub rendered: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The previous frame was still being composited.
    RenderBusy,
    /// Playback is more than one frame behind the clock.
    Behind { expected: u64 },
    /// The assembled bytes did not match the frame size.
    SizeMismatch { expected: usize, actual: usize },
}

#[derive(Debug)]
pub enum FrameOutcome {
    /// Composite `frame` once `delay` has passed.
    Render {
        frame: Frame,
        index: u64,
        delay: Duration,
    },
    Skipped { index: u64, reason: SkipReason },
}

#[derive(Debug)]
pub struct FrameScheduler {
    width: u32,
    height: u32,
    frame_len: usize,
    fps: f64,
    interval: Duration,
    state: SchedulerState,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    partial: Vec<u8>,
    spare: Option<Vec<u8>>,
    render_in_progress: bool,
    counters: FrameCounters,
}

impl FrameScheduler {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 30.0 };
        let frame_len = Frame::expected_len(width, height);
        Self {
            width,
            height,
            frame_len,
            fps,
            interval: Duration::from_secs_f64(1.0 / fps),
            state: SchedulerState::Idle,
            started_at: None,
            paused_at: None,
            partial: Vec::with_capacity(frame_len),
            spare: None,
            render_in_progress: false,
            counters: FrameCounters::default(),
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.state = SchedulerState::Decoding;
        self.started_at = Some(now);
        self.paused_at = None;
        self.partial.clear();
        self.render_in_progress = false;
        self.counters = FrameCounters::default();
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn counters(&self) -> FrameCounters {
        self.counters
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn is_render_in_progress(&self) -> bool {
        self.render_in_progress
    }

    /// Bytes still missing from the frame being assembled.
    pub fn bytes_needed(&self) -> usize {
        self.frame_len - self.partial.len()
    }

    pub fn has_partial_frame(&self) -> bool {
        !self.partial.is_empty()
    }

    /// Append decoder output. Callers pass at most [`bytes_needed`](Self::bytes_needed)
    /// bytes; anything past the current frame is ignored.
    pub fn push_bytes(&mut self, data: &[u8], now: Instant) -> Option<FrameOutcome> {
        if !matches!(self.state, SchedulerState::Decoding | SchedulerState::Paused) {
            return None;
        }
        let needed = self.bytes_needed();
        debug_assert!(data.len() <= needed, "push past frame boundary");
        let take = data.len().min(needed);
        self.partial.extend_from_slice(&data[..take]);
        if self.partial.len() < self.frame_len {
            return None;
        }
        Some(self.complete_frame(now))
    }

    fn complete_frame(&mut self, now: Instant) -> FrameOutcome {
        let index = self.counters.decoded;
        self.counters.decoded += 1;

        if self.render_in_progress {
            self.counters.skipped += 1;
            self.partial.clear();
            let conflict = PlaybackError::ConcurrentWriteConflict { frame_index: index };
            tracing::debug!(code = conflict.code(), frame = index, "{conflict}");
            return FrameOutcome::Skipped {
                index,
                reason: SkipReason::RenderBusy,
            };
        }

        let elapsed = self.elapsed(now);
        let expected = (elapsed.as_secs_f64() * self.fps).floor() as u64;
        if index + 1 < expected {
            self.counters.skipped += 1;
            self.partial.clear();
            tracing::trace!(frame = index, expected, "behind schedule, frame skipped");
            return FrameOutcome::Skipped {
                index,
                reason: SkipReason::Behind { expected },
            };
        }

        let due = self.media_time(index);
        let delay = due.saturating_sub(elapsed);
        let next = self
            .spare
            .take()
            .unwrap_or_else(|| Vec::with_capacity(self.frame_len));
        let data = std::mem::replace(&mut self.partial, next);
        let frame = match Frame::new(self.width, self.height, data) {
            Ok(frame) => frame,
            Err(error) => {
                self.counters.skipped += 1;
                tracing::warn!(code = error.code(), frame = index, "{error}");
                let (expected, actual) = match error {
                    PlaybackError::BufferSizeMismatch {
                        expected, actual, ..
                    } => (expected, actual),
                    _ => (self.frame_len, 0),
                };
                return FrameOutcome::Skipped {
                    index,
                    reason: SkipReason::SizeMismatch { expected, actual },
                };
            }
        };
        self.render_in_progress = true;
        self.counters.rendered += 1;
        FrameOutcome::Render {
            frame,
            index,
            delay,
        }
    }

    /// Clears the render-in-progress guard.
    pub fn finish_render(&mut self) {
        self.render_in_progress = false;
    }

    /// Hand back a frame buffer for the next assembly.
    pub fn recycle(&mut self, mut buffer: Vec<u8>) {
        if self.spare.is_none() && buffer.capacity() >= self.frame_len {
            buffer.clear();
            self.spare = Some(buffer);
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if self.state == SchedulerState::Decoding {
            self.state = SchedulerState::Paused;
            self.paused_at = Some(now);
        }
    }

    /// Returns how long playback was paused.
    pub fn resume(&mut self, now: Instant) -> Option<Duration> {
        if self.state != SchedulerState::Paused {
            return None;
        }
        self.state = SchedulerState::Decoding;
        let paused_for = self
            .paused_at
            .take()
            .map(|at| now.saturating_duration_since(at))?;
        if let Some(started_at) = self.started_at.as_mut() {
            *started_at += paused_for;
        }
        Some(paused_for)
    }

    /// End of stream. Incomplete trailing bytes are dropped.
    pub fn end(&mut self) {
        if !self.partial.is_empty() {
            tracing::debug!(
                bytes = self.partial.len(),
                frame_len = self.frame_len,
                "discarding partial trailing frame"
            );
            self.partial.clear();
        }
        self.state = SchedulerState::Ended;
    }

    pub fn abort(&mut self) {
        self.partial.clear();
        self.state = SchedulerState::Aborted;
    }

    /// Wall-clock playback time since `start`, excluding pauses.
    pub fn elapsed(&self, now: Instant) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let until = self.paused_at.unwrap_or(now);
        until.saturating_duration_since(started_at)
    }

    /// Presentation time of frame `index` relative to the session start.
    pub fn media_time(&self, index: u64) -> Duration {
        Duration::from_secs_f64(index as f64 / self.fps)
    }
}
