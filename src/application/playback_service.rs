// Playback service - runs the playback clock against the recorded session store
use crate::application::playback::{PlaybackController, PlaybackState};
use crate::application::time_series_store::TimeSeriesStore;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "action", content = "value", rename_all = "snake_case")]
pub enum PlaybackCommand {
    Play,
    Pause,
    Toggle,
    SeekProgress(f64),
    SeekTimestamp(u64),
    Speed(f64),
    AutoLoop(bool),
}

#[derive(Clone)]
pub struct PlaybackHandle {
    commands: mpsc::Sender<PlaybackCommand>,
    state: watch::Receiver<PlaybackState>,
}

impl PlaybackHandle {
    /// Returns false once the service has stopped.
    pub async fn apply(&self, command: PlaybackCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }
}

pub fn spawn_playback(
    controller: PlaybackController,
    store: Arc<Mutex<TimeSeriesStore>>,
    tick: Duration,
    cancel: CancellationToken,
) -> (PlaybackHandle, JoinHandle<()>) {
    let (commands, rx) = mpsc::channel(16);
    let (state_tx, state) = watch::channel(controller.state());

    let task = tokio::spawn(run_playback(controller, store, tick, rx, state_tx, cancel));
    (PlaybackHandle { commands, state }, task)
}

async fn run_playback(
    mut controller: PlaybackController,
    store: Arc<Mutex<TimeSeriesStore>>,
    tick: Duration,
    mut commands: mpsc::Receiver<PlaybackCommand>,
    state: watch::Sender<PlaybackState>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(tick.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            command = commands.recv() => {
                let Some(command) = command else { break };
                sync_total_frames(&mut controller, &store);
                apply(&mut controller, command, &store);
            }

            now = ticker.tick() => {
                let elapsed = now.saturating_duration_since(last_tick);
                last_tick = now;
                sync_total_frames(&mut controller, &store);
                controller.tick(elapsed.as_millis() as u64);
            }
        }

        let current = controller.state();
        state.send_if_modified(|published| {
            let changed = *published != current;
            *published = current;
            changed
        });
    }

    tracing::debug!("Playback service stopped");
}

fn sync_total_frames(controller: &mut PlaybackController, store: &Mutex<TimeSeriesStore>) {
    let total = store.lock().len();
    if total != controller.state().total_frames {
        controller.set_total_frames(total);
    }
}

fn apply(controller: &mut PlaybackController, command: PlaybackCommand, store: &Mutex<TimeSeriesStore>) {
    tracing::debug!("Playback command {:?}", command);
    match command {
        PlaybackCommand::Play => controller.play(),
        PlaybackCommand::Pause => controller.pause(),
        PlaybackCommand::Toggle => controller.toggle(),
        PlaybackCommand::SeekProgress(progress) => controller.seek_to_progress(progress),
        PlaybackCommand::SeekTimestamp(timestamp) => {
            if controller.seek_to_timestamp(timestamp, &store.lock()).is_none() {
                tracing::debug!("Nothing recorded to seek to {}", timestamp);
            }
        }
        PlaybackCommand::Speed(speed) => controller.set_speed(speed),
        PlaybackCommand::AutoLoop(enabled) => controller.set_auto_loop(enabled),
    }
}
