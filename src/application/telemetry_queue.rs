// Telemetry queue - turns a high-frequency inbound stream into one UI-safe value per tick
use crate::application::aggregation::{self, ProcessStrategy, DEFAULT_SMOOTHING_FACTOR};
use crate::application::listeners::Listeners;
use crate::domain::telemetry::NumericFields;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Share of the capacity evicted in one go when the queue is full.
const EVICTION_PERCENT: usize = 30;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub throttle_ms: u64,
    pub debounce_ms: u64,
    pub max_queue_size: usize,
    pub process_strategy: ProcessStrategy,
    pub smoothing_factor: f64,
    /// Utilization above which the adaptive strategy falls back to `latest`.
    pub adaptive_threshold: f64,
    pub enable_metrics: bool,
    pub reset_smoothing_on_reconnect: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 100,
            debounce_ms: 50,
            max_queue_size: 1000,
            process_strategy: ProcessStrategy::Latest,
            smoothing_factor: DEFAULT_SMOOTHING_FACTOR,
            adaptive_threshold: 0.8,
            enable_metrics: false,
            reset_smoothing_on_reconnect: false,
        }
    }
}

impl QueueConfig {
    pub fn with_strategy(mut self, strategy: ProcessStrategy) -> Self {
        self.process_strategy = strategy;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    #[default]
    Idle,
    Buffering,
    Streaming,
    Overloaded,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueMetrics {
    pub enqueued: u64,
    pub processed: u64,
    pub dropped: u64,
    pub failed_batches: u64,
    pub buffered: usize,
    pub capacity: usize,
    pub avg_processing_us: f64,
}

/// Pull-based view of a queue for UI consumers.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot<T> {
    pub data: Option<T>,
    pub status: QueueStatus,
    pub metrics: QueueMetrics,
}

impl<T> Default for QueueSnapshot<T> {
    fn default() -> Self {
        Self {
            data: None,
            status: QueueStatus::Idle,
            metrics: QueueMetrics::default(),
        }
    }
}

/// Bounded, lossy, latest-biased queue.
///
/// `tick(now_ms)` runs both schedules: the throttled processor (at most once
/// per `throttle_ms`) and the debounced processor (`debounce_ms` after the
/// last enqueue), so the final value of a burst is always published.
pub struct TelemetryQueue<T: NumericFields> {
    config: QueueConfig,
    buffer: VecDeque<T>,
    last_emitted: Option<T>,
    ema_seed: Option<T>,
    status: QueueStatus,
    enqueued: u64,
    processed: u64,
    dropped: u64,
    failed_batches: u64,
    batches: u64,
    processing_time: Duration,
    last_processed_at: Option<u64>,
    last_enqueue_at: Option<u64>,
    debounce_armed: bool,
    on_publish: Listeners<T>,
    on_overflow: Listeners<Vec<T>>,
    on_metrics: Listeners<QueueMetrics>,
}

impl<T: NumericFields> TelemetryQueue<T> {
    pub fn new(config: QueueConfig) -> Self {
        let capacity = config.max_queue_size.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            config,
            last_emitted: None,
            ema_seed: None,
            status: QueueStatus::Idle,
            enqueued: 0,
            processed: 0,
            dropped: 0,
            failed_batches: 0,
            batches: 0,
            processing_time: Duration::ZERO,
            last_processed_at: None,
            last_enqueue_at: None,
            debounce_armed: false,
            on_publish: Listeners::new("queue publish"),
            on_overflow: Listeners::new("queue overflow"),
            on_metrics: Listeners::new("queue metrics"),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn on_publish(&self) -> &Listeners<T> {
        &self.on_publish
    }

    /// Receives every bulk-evicted batch. Advisory only.
    pub fn on_overflow(&self) -> &Listeners<Vec<T>> {
        &self.on_overflow
    }

    /// Per-tick metrics, only delivered when `enable_metrics` is set.
    pub fn on_metrics(&self) -> &Listeners<QueueMetrics> {
        &self.on_metrics
    }

    fn capacity(&self) -> usize {
        self.config.max_queue_size.max(1)
    }

    fn utilization(&self) -> f64 {
        self.buffer.len() as f64 / self.capacity() as f64
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn current(&self) -> Option<&T> {
        self.last_emitted.as_ref()
    }

    pub fn status(&self) -> QueueStatus {
        self.status
    }

    /// Append a sample. Returns how many old samples were evicted to make room.
    pub fn enqueue(&mut self, sample: T, now_ms: u64) -> usize {
        let mut evicted_count = 0;

        if self.buffer.len() >= self.capacity() {
            let evict = (self.capacity() * EVICTION_PERCENT)
                .div_ceil(100)
                .clamp(1, self.buffer.len());
            let evicted: Vec<T> = self.buffer.drain(..evict).collect();
            evicted_count = evicted.len();
            self.dropped += evicted_count as u64;

            tracing::debug!(
                "Queue full ({} samples), evicted oldest {}",
                self.capacity(),
                evicted_count
            );
            self.on_overflow.notify(&evicted);
        }

        self.buffer.push_back(sample);
        self.enqueued += 1;
        self.last_enqueue_at = Some(now_ms);
        self.debounce_armed = true;
        self.status = if self.utilization() > self.config.adaptive_threshold {
            QueueStatus::Overloaded
        } else {
            QueueStatus::Buffering
        };

        evicted_count
    }

    /// Run the throttle and debounce schedules. Returns the published value, if any.
    pub fn tick(&mut self, now_ms: u64) -> Option<T> {
        let throttle_due = self
            .last_processed_at
            .is_none_or(|at| now_ms.saturating_sub(at) >= self.config.throttle_ms);
        let debounce_due = self.debounce_armed
            && self
                .last_enqueue_at
                .is_some_and(|at| now_ms.saturating_sub(at) >= self.config.debounce_ms);

        if self.buffer.is_empty() {
            if debounce_due {
                self.debounce_armed = false;
            }
            return None;
        }

        if throttle_due || debounce_due {
            self.process(now_ms)
        } else {
            None
        }
    }

    /// Drain and aggregate immediately, ignoring both schedules.
    pub fn flush(&mut self, now_ms: u64) -> Option<T> {
        if self.buffer.is_empty() {
            return None;
        }
        self.process(now_ms)
    }

    /// Forget the exponential-moving-average state so the next smoothed value
    /// is seeded from fresh data.
    pub fn reset_smoothing(&mut self) {
        self.ema_seed = None;
    }

    fn process(&mut self, now_ms: u64) -> Option<T> {
        let strategy = match self.config.process_strategy {
            ProcessStrategy::Adaptive => {
                aggregation::resolve_adaptive(self.utilization(), self.config.adaptive_threshold)
            }
            other => other,
        };

        let batch: Vec<T> = self.buffer.drain(..).collect();
        self.last_processed_at = Some(now_ms);
        self.debounce_armed = false;

        let started = Instant::now();
        let result = match strategy {
            ProcessStrategy::Latest | ProcessStrategy::Adaptive => aggregation::latest(&batch),
            ProcessStrategy::Average => aggregation::average(&batch),
            ProcessStrategy::Median => aggregation::median(&batch),
            ProcessStrategy::Smooth => aggregation::smooth(
                &batch,
                self.ema_seed.as_ref(),
                self.config.smoothing_factor,
            ),
        };
        self.processing_time += started.elapsed();
        self.batches += 1;

        let published = match result {
            Ok(value) => {
                self.processed += batch.len() as u64;
                self.status = QueueStatus::Streaming;
                self.ema_seed = Some(value.clone());
                self.last_emitted = Some(value.clone());
                self.on_publish.notify(&value);
                Some(value)
            }
            Err(e) => {
                // The batch is stale by the next tick, so it is discarded rather than retried.
                self.failed_batches += 1;
                self.dropped += batch.len() as u64;
                tracing::warn!(
                    "Failed to aggregate batch of {} with {:?}: {}",
                    batch.len(),
                    strategy,
                    e
                );
                None
            }
        };

        if self.config.enable_metrics {
            self.on_metrics.notify(&self.metrics());
        }

        published
    }

    pub fn metrics(&self) -> QueueMetrics {
        let avg_processing_us = if self.batches == 0 {
            0.0
        } else {
            self.processing_time.as_secs_f64() * 1_000_000.0 / self.batches as f64
        };

        QueueMetrics {
            enqueued: self.enqueued,
            processed: self.processed,
            dropped: self.dropped,
            failed_batches: self.failed_batches,
            buffered: self.buffer.len(),
            capacity: self.capacity(),
            avg_processing_us,
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot<T> {
        QueueSnapshot {
            data: self.last_emitted.clone(),
            status: self.status,
            metrics: self.metrics(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::telemetry::TelemetrySample;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sample(timestamp: u64, speed: f64) -> TelemetrySample {
        TelemetrySample::new(timestamp, speed, 60.0, 0.0, 6, 10500.0, false)
    }

    fn queue(strategy: ProcessStrategy) -> TelemetryQueue<TelemetrySample> {
        TelemetryQueue::new(QueueConfig::default().with_strategy(strategy))
    }

    #[test]
    fn test_bulk_eviction_keeps_queue_bounded() {
        let mut q = TelemetryQueue::new(QueueConfig {
            max_queue_size: 1000,
            ..QueueConfig::default()
        });
        let evicted_batches = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let evicted_clone = evicted_batches.clone();
        q.on_overflow().register(move |batch: &Vec<TelemetrySample>| {
            evicted_clone.lock().push(batch.len());
            Ok(())
        });

        let mut evicted_total = 0;
        for i in 0..2500 {
            evicted_total += q.enqueue(sample(i, 100.0), 0);
            assert!(q.len() <= 1000);
        }

        let metrics = q.metrics();
        assert_eq!(metrics.enqueued, 2500);
        assert_eq!(metrics.dropped as usize, evicted_total);
        assert_eq!(q.len() + evicted_total, 2500);
        assert_eq!(*evicted_batches.lock(), vec![300; 5]);
    }

    #[test]
    fn test_eviction_drops_oldest_first() {
        let mut q = TelemetryQueue::new(QueueConfig {
            max_queue_size: 10,
            ..QueueConfig::default()
        });
        for i in 0..11 {
            q.enqueue(sample(i, i as f64), 0);
        }
        // 3 evicted (30% of 10), 8 remain
        assert_eq!(q.len(), 8);
        assert_eq!(q.flush(0).unwrap().timestamp, 10);
    }

    #[test]
    fn test_throttle_limits_processing_rate() {
        let mut q = queue(ProcessStrategy::Latest);

        q.enqueue(sample(1, 100.0), 0);
        assert_eq!(q.tick(0).unwrap().timestamp, 1);

        q.enqueue(sample(2, 110.0), 10);
        assert!(q.tick(20).is_none());
        q.enqueue(sample(3, 120.0), 30);
        assert!(q.tick(40).is_none());

        // throttle window has elapsed
        assert_eq!(q.tick(100).unwrap().timestamp, 3);
        assert!(q.is_empty());
    }

    #[test]
    fn test_debounce_publishes_final_value_of_burst() {
        let mut q = TelemetryQueue::new(QueueConfig {
            throttle_ms: 1000,
            debounce_ms: 50,
            ..QueueConfig::default()
        });

        q.enqueue(sample(1, 100.0), 0);
        q.tick(0);
        q.enqueue(sample(2, 150.0), 10);
        q.enqueue(sample(3, 175.0), 20);

        assert!(q.tick(60).is_none());
        let published = q.tick(70).unwrap();
        assert_eq!(published.timestamp, 3);
        assert_eq!(q.current().unwrap().timestamp, 3);
    }

    #[test]
    fn test_median_strategy_ignores_outlier() {
        let mut q = queue(ProcessStrategy::Median);
        for i in 0..49 {
            q.enqueue(sample(i, 100.0), i);
        }
        q.enqueue(sample(49, 300.0), 49);

        let published = q.tick(100).unwrap();
        assert!((published.speed - 100.0).abs() < 1.0);
    }

    #[test]
    fn test_smooth_with_unit_alpha_tracks_latest() {
        let mut q = TelemetryQueue::new(QueueConfig {
            process_strategy: ProcessStrategy::Smooth,
            smoothing_factor: 1.0,
            ..QueueConfig::default()
        });

        for (tick, speed) in [(0, 100.0), (100, 250.0), (200, 90.0)] {
            q.enqueue(sample(tick, speed), tick);
            assert_eq!(q.tick(tick).unwrap().speed, speed);
        }
    }

    #[test]
    fn test_smoothing_reset_reseeds_from_fresh_data() {
        let mut q = queue(ProcessStrategy::Smooth);
        q.enqueue(sample(0, 100.0), 0);
        q.tick(0);
        q.enqueue(sample(100, 200.0), 100);
        assert!((q.tick(100).unwrap().speed - 130.0).abs() < 1e-9);

        q.reset_smoothing();
        q.enqueue(sample(200, 200.0), 200);
        assert_eq!(q.tick(200).unwrap().speed, 200.0);
    }

    #[test]
    fn test_adaptive_uses_latest_under_load() {
        let mut q = TelemetryQueue::new(QueueConfig {
            max_queue_size: 10,
            process_strategy: ProcessStrategy::Adaptive,
            ..QueueConfig::default()
        });
        for i in 0..9 {
            q.enqueue(sample(i, 100.0 + i as f64 * 10.0), i);
        }
        assert_eq!(q.status(), QueueStatus::Overloaded);
        assert_eq!(q.tick(10).unwrap().speed, 180.0);

        q.enqueue(sample(20, 100.0), 20);
        q.enqueue(sample(21, 200.0), 21);
        // Low utilization averages the batch
        assert_eq!(q.tick(200).unwrap().speed, 150.0);
    }

    #[test]
    fn test_failed_batch_is_dropped_and_queue_continues() {
        let mut q = queue(ProcessStrategy::Average);
        q.enqueue(sample(0, f64::NAN), 0);
        assert!(q.tick(0).is_none());

        let metrics = q.metrics();
        assert_eq!(metrics.failed_batches, 1);
        assert_eq!(metrics.dropped, 1);

        q.enqueue(sample(100, 120.0), 100);
        assert_eq!(q.tick(100).unwrap().speed, 120.0);
    }

    #[test]
    fn test_metrics_listener_only_when_enabled() {
        let seen = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicUsize::new(0));

        for enabled in [false, true] {
            let mut q: TelemetryQueue<TelemetrySample> = TelemetryQueue::new(QueueConfig {
                enable_metrics: enabled,
                ..QueueConfig::default()
            });
            let seen_clone = seen.clone();
            let processed_clone = processed.clone();
            q.on_metrics().register(move |m: &QueueMetrics| {
                processed_clone.store(m.processed as usize, Ordering::SeqCst);
                seen_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            q.enqueue(sample(0, 100.0), 0);
            q.tick(0);
        }

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(processed.load(Ordering::SeqCst), 1);
    }
}
