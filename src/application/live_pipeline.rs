// Live pipeline - routes validated frames from the connection into per-kind queues
use crate::application::aggregation::ProcessStrategy;
use crate::application::connection_manager::{ConnectionManager, ConnectionStatus, StatusChange};
use crate::application::connection_service::{spawn_connection, ConnectionHandle};
use crate::application::queue_service::{spawn_queue, QueueHandle};
use crate::application::telemetry_queue::{QueueConfig, TelemetryQueue};
use crate::application::time_series_store::TimeSeriesStore;
use crate::application::transport::{SocketId, TransportEvent};
use crate::domain::clock::Clock;
use crate::domain::frame::InboundFrame;
use crate::domain::telemetry::{DriverPosition, TelemetrySample, WeatherSample};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct LivePipeline {
    pub telemetry: QueueHandle<TelemetrySample>,
    pub positions: QueueHandle<DriverPosition>,
    pub weather: QueueHandle<WeatherSample>,
    pub connection: ConnectionHandle,
}

impl LivePipeline {
    /// Spawn the three queues and the connection service.
    ///
    /// Telemetry uses the configured strategy, positions always keep the
    /// latest fix and weather is averaged. Every published telemetry value
    /// is appended to `store`, which must not be the recorded-session store
    /// that playback walks.
    pub fn start(
        config: &QueueConfig,
        manager: ConnectionManager,
        events: mpsc::UnboundedReceiver<(SocketId, TransportEvent)>,
        store: Arc<Mutex<TimeSeriesStore>>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let telemetry_queue = TelemetryQueue::new(config.clone());
        telemetry_queue.on_publish().register(move |sample: &TelemetrySample| {
            store.lock().insert([*sample]);
            Ok(())
        });

        let (telemetry, telemetry_task) =
            spawn_queue("telemetry", telemetry_queue, clock.clone(), cancel.clone());
        let (positions, positions_task) = spawn_queue(
            "position",
            TelemetryQueue::new(config.clone().with_strategy(ProcessStrategy::Latest)),
            clock.clone(),
            cancel.clone(),
        );
        let (weather, weather_task) = spawn_queue(
            "weather",
            TelemetryQueue::new(config.clone().with_strategy(ProcessStrategy::Average)),
            clock.clone(),
            cancel.clone(),
        );

        route_frames(&manager, telemetry.clone(), positions.clone(), weather.clone());
        if config.reset_smoothing_on_reconnect {
            reset_smoothing_on_open(&manager, telemetry.clone());
        }

        let (connection, connection_task) = spawn_connection(manager, events, clock, cancel);

        let pipeline = Self {
            telemetry,
            positions,
            weather,
            connection,
        };
        let tasks = vec![telemetry_task, positions_task, weather_task, connection_task];
        (pipeline, tasks)
    }
}

fn route_frames(
    manager: &ConnectionManager,
    telemetry: QueueHandle<TelemetrySample>,
    positions: QueueHandle<DriverPosition>,
    weather: QueueHandle<WeatherSample>,
) {
    manager.on_message().register(move |frame: &InboundFrame| {
        let accepted = match frame {
            InboundFrame::Telemetry { sample, .. } => telemetry.push(*sample),
            InboundFrame::Position(position) => positions.push(*position),
            InboundFrame::Weather(sample) => weather.push(*sample),
            InboundFrame::Heartbeat => true,
        };
        if !accepted {
            anyhow::bail!("{} queue is not accepting samples", frame.kind());
        }
        Ok(())
    });
}

fn reset_smoothing_on_open(manager: &ConnectionManager, telemetry: QueueHandle<TelemetrySample>) {
    manager.on_status().register(move |change: &StatusChange| {
        if change.status == ConnectionStatus::Open && !telemetry.reset_smoothing() {
            anyhow::bail!("telemetry queue is not accepting commands");
        }
        Ok(())
    });
}
