// Playback controller - a virtual clock over recorded frames
use crate::application::listeners::Listeners;
use crate::application::time_series_store::TimeSeriesStore;
use serde::{Deserialize, Serialize};

pub const MIN_SPEED: f64 = 0.1;
pub const MAX_SPEED: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Virtual time per frame at 1x speed.
    pub frame_interval_ms: u64,
    /// Cadence of the driving timer.
    pub tick_ms: u64,
    pub auto_loop: bool,
    pub speed: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 100,
            tick_ms: 16,
            auto_loop: false,
            speed: 1.0,
        }
    }
}

/// Emitted for playback advances and seeks alike.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameChange {
    pub index: usize,
    pub total_frames: usize,
    pub progress: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackState {
    pub current_index: usize,
    pub total_frames: usize,
    pub playing: bool,
    pub speed: f64,
    pub auto_loop: bool,
    pub progress: f64,
}

pub struct PlaybackController {
    frame_interval_ms: f64,
    total_frames: usize,
    current_index: usize,
    playing: bool,
    speed: f64,
    auto_loop: bool,
    accumulator_ms: f64,
    on_frame: Listeners<FrameChange>,
    on_state: Listeners<PlaybackState>,
}

fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        1.0
    } else {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    }
}

impl PlaybackController {
    pub fn new(config: PlaybackConfig, total_frames: usize) -> Self {
        Self {
            frame_interval_ms: config.frame_interval_ms.max(1) as f64,
            total_frames,
            current_index: 0,
            playing: false,
            speed: clamp_speed(config.speed),
            auto_loop: config.auto_loop,
            accumulator_ms: 0.0,
            on_frame: Listeners::new("playback frame"),
            on_state: Listeners::new("playback state"),
        }
    }

    pub fn on_frame(&self) -> &Listeners<FrameChange> {
        &self.on_frame
    }

    pub fn on_state(&self) -> &Listeners<PlaybackState> {
        &self.on_state
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn progress(&self) -> f64 {
        if self.total_frames <= 1 {
            0.0
        } else {
            self.current_index as f64 / (self.total_frames - 1) as f64
        }
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            current_index: self.current_index,
            total_frames: self.total_frames,
            playing: self.playing,
            speed: self.speed,
            auto_loop: self.auto_loop,
            progress: self.progress(),
        }
    }

    fn last_index(&self) -> usize {
        self.total_frames.saturating_sub(1)
    }

    /// Start playing. From the final frame without auto-loop, restarts at frame 0.
    pub fn play(&mut self) {
        if self.total_frames == 0 || self.playing {
            return;
        }
        if self.current_index >= self.last_index() && !self.auto_loop {
            self.set_index(0);
        }
        self.playing = true;
        self.notify_state();
    }

    pub fn pause(&mut self) {
        if !self.playing {
            return;
        }
        self.playing = false;
        self.accumulator_ms = 0.0;
        self.notify_state();
    }

    pub fn toggle(&mut self) {
        if self.playing {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = clamp_speed(speed);
        self.notify_state();
    }

    pub fn set_auto_loop(&mut self, auto_loop: bool) {
        self.auto_loop = auto_loop;
        self.notify_state();
    }

    /// Resize the timeline, pulling the index back inside it.
    pub fn set_total_frames(&mut self, total_frames: usize) {
        self.total_frames = total_frames;
        if total_frames == 0 {
            self.playing = false;
            self.current_index = 0;
        } else if self.current_index > self.last_index() {
            self.set_index(self.last_index());
        }
        self.notify_state();
    }

    /// Advance the virtual clock by `delta_ms` of wall time.
    pub fn tick(&mut self, delta_ms: u64) {
        if !self.playing || self.total_frames == 0 {
            return;
        }

        // The remainder carries over so fractional speeds never skip or stall.
        self.accumulator_ms += delta_ms as f64 * self.speed;
        while self.accumulator_ms >= self.frame_interval_ms {
            self.accumulator_ms -= self.frame_interval_ms;
            if !self.advance() {
                break;
            }
        }
    }

    fn advance(&mut self) -> bool {
        if self.current_index < self.last_index() {
            self.current_index += 1;
            self.notify_frame();
            true
        } else if self.auto_loop {
            self.current_index = 0;
            self.notify_frame();
            true
        } else {
            self.playing = false;
            self.accumulator_ms = 0.0;
            self.notify_state();
            false
        }
    }

    pub fn seek_to_index(&mut self, index: usize) {
        if self.total_frames == 0 {
            return;
        }
        self.set_index(index.min(self.last_index()));
    }

    /// Seek to a fraction of the timeline, `0.0..=1.0`.
    pub fn seek_to_progress(&mut self, progress: f64) {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        let index = (progress * self.last_index() as f64).round() as usize;
        self.seek_to_index(index);
    }

    /// Seek to the frame at or just before `timestamp`; before the first
    /// sample resolves to frame 0. Returns the resolved frame.
    pub fn seek_to_timestamp(&mut self, timestamp: u64, store: &TimeSeriesStore) -> Option<usize> {
        if self.total_frames == 0 || store.is_empty() {
            return None;
        }
        let index = store
            .query_by_timestamp(timestamp)
            .map(|hit| hit.position)
            .unwrap_or(0);
        self.seek_to_index(index);
        Some(self.current_index)
    }

    fn set_index(&mut self, index: usize) {
        self.current_index = index;
        self.accumulator_ms = 0.0;
        self.notify_frame();
    }

    fn notify_frame(&self) {
        self.on_frame.notify(&FrameChange {
            index: self.current_index,
            total_frames: self.total_frames,
            progress: self.progress(),
        });
    }

    fn notify_state(&self) {
        self.on_state.notify(&self.state());
    }
}
