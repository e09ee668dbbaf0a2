// Queue service - owns a TelemetryQueue on its own task and publishes snapshots
use crate::application::telemetry_queue::{QueueSnapshot, TelemetryQueue};
use crate::domain::clock::Clock;
use crate::domain::telemetry::NumericFields;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Granularity of the throttle and debounce schedules.
pub const QUEUE_TICK: Duration = Duration::from_millis(10);

enum QueueCommand<T> {
    Sample(T),
    ResetSmoothing,
}

/// Cheap, cloneable handle to a running queue.
pub struct QueueHandle<T> {
    commands: mpsc::Sender<QueueCommand<T>>,
    snapshots: watch::Receiver<QueueSnapshot<T>>,
}

impl<T> Clone for QueueHandle<T> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            snapshots: self.snapshots.clone(),
        }
    }
}

impl<T: Clone> QueueHandle<T> {
    /// Hand a sample to the queue without waiting. Returns false when the
    /// command channel is full or the queue has stopped.
    pub fn push(&self, sample: T) -> bool {
        self.commands.try_send(QueueCommand::Sample(sample)).is_ok()
    }

    pub fn reset_smoothing(&self) -> bool {
        self.commands.try_send(QueueCommand::ResetSmoothing).is_ok()
    }

    pub fn snapshot(&self) -> QueueSnapshot<T> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot<T>> {
        self.snapshots.clone()
    }
}

pub fn spawn_queue<T>(
    name: &'static str,
    queue: TelemetryQueue<T>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) -> (QueueHandle<T>, JoinHandle<()>)
where
    T: NumericFields + Sync,
{
    let (commands, rx) = mpsc::channel(queue.config().max_queue_size.max(1));
    let (snapshot_tx, snapshots) = watch::channel(queue.snapshot());

    let task = tokio::spawn(run_queue(name, queue, clock, rx, snapshot_tx, cancel));
    (QueueHandle { commands, snapshots }, task)
}

async fn run_queue<T: NumericFields + Sync>(
    name: &'static str,
    mut queue: TelemetryQueue<T>,
    clock: Arc<dyn Clock>,
    mut commands: mpsc::Receiver<QueueCommand<T>>,
    snapshots: watch::Sender<QueueSnapshot<T>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(QUEUE_TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_status = queue.status();

    tracing::debug!("{} queue started ({:?})", name, queue.config().process_strategy);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            command = commands.recv() => match command {
                Some(QueueCommand::Sample(sample)) => {
                    queue.enqueue(sample, clock.now_ms());
                }
                Some(QueueCommand::ResetSmoothing) => {
                    tracing::debug!("{} queue smoothing reset", name);
                    queue.reset_smoothing();
                }
                None => break,
            },

            _ = ticker.tick() => {
                let published = queue.tick(clock.now_ms()).is_some();
                let status = queue.status();
                if published || status != last_status {
                    last_status = status;
                    snapshots.send_replace(queue.snapshot());
                }
            }
        }
    }

    // Publish whatever is still buffered so the last value is not lost.
    if queue.flush(clock.now_ms()).is_some() {
        snapshots.send_replace(queue.snapshot());
    }
    tracing::debug!("{} queue stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::aggregation::ProcessStrategy;
    use crate::application::telemetry_queue::{QueueConfig, QueueStatus};
    use crate::domain::clock::MonotonicClock;
    use crate::domain::telemetry::TelemetrySample;

    fn sample(timestamp: u64, speed: f64) -> TelemetrySample {
        TelemetrySample::new(timestamp, speed, 80.0, 0.0, 7, 11000.0, false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_aggregated_snapshot() {
        let cancel = CancellationToken::new();
        let queue = TelemetryQueue::new(QueueConfig::default().with_strategy(ProcessStrategy::Average));
        let (handle, task) = spawn_queue("test", queue, Arc::new(MonotonicClock::new()), cancel.clone());
        let mut updates = handle.subscribe();

        // Let the first throttle window open and close on an empty buffer.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(handle.push(sample(1, 100.0)));
        assert!(handle.push(sample(2, 200.0)));

        updates.changed().await.expect("queue alive");
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.status, QueueStatus::Streaming);
        assert_eq!(snapshot.data.map(|s| s.speed), Some(150.0));
        assert_eq!(snapshot.metrics.processed, 2);

        cancel.cancel();
        task.await.expect("queue task");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_flushes_pending_samples() {
        let cancel = CancellationToken::new();
        let config = QueueConfig {
            throttle_ms: 10_000,
            debounce_ms: 10_000,
            ..QueueConfig::default()
        };
        let (handle, task) = spawn_queue(
            "test",
            TelemetryQueue::new(config),
            Arc::new(MonotonicClock::new()),
            cancel.clone(),
        );

        // The first sample goes out on the first tick; the next one waits on both schedules.
        handle.push(sample(1, 100.0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.snapshot().data.map(|s| s.speed), Some(100.0));

        handle.push(sample(5, 250.0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.snapshot().data.map(|s| s.speed), Some(100.0));

        cancel.cancel();
        task.await.expect("queue task");
        assert_eq!(handle.snapshot().data.map(|s| s.speed), Some(250.0));
    }
}
