// HTTP request handlers
use crate::application::connection_manager::{ConnectionState, ReconnectMode};
use crate::application::connection_service::ServiceStopped;
use crate::application::playback::PlaybackState;
use crate::application::playback_service::PlaybackCommand;
use crate::application::sampling::CullingStrategy;
use crate::application::telemetry_queue::QueueSnapshot;
use crate::application::time_series_store::{QueryFilter, QueryResult, SortDirection, TimestampMatch};
use crate::application::virtualization::{
    CompressionMetrics, SamplingConfig, SeriesFilter, VirtualizationEngine,
};
use crate::domain::series::VirtualizedSeries;
use crate::domain::telemetry::{DriverPosition, TelemetryField, TelemetrySample, WeatherSample};
use crate::infrastructure::chunked_json::stream_from_watch;
use crate::presentation::app_state::{AppState, StoreSource};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("service is shutting down")]
    Unavailable,
}

impl From<ServiceStopped> for ApiError {
    fn from(_: ServiceStopped) -> Self {
        ApiError::Unavailable
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn live_telemetry(State(state): State<Arc<AppState>>) -> Json<QueueSnapshot<TelemetrySample>> {
    Json(state.live.telemetry.snapshot())
}

pub async fn live_positions(State(state): State<Arc<AppState>>) -> Json<QueueSnapshot<DriverPosition>> {
    Json(state.live.positions.snapshot())
}

pub async fn live_weather(State(state): State<Arc<AppState>>) -> Json<QueueSnapshot<WeatherSample>> {
    Json(state.live.weather.snapshot())
}

/// Stream processed telemetry as NDJSON, one line per published value
pub async fn live_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    stream_from_watch(state.live.telemetry.subscribe(), |snapshot| snapshot.data)
}

pub async fn connection_state(State(state): State<Arc<AppState>>) -> Json<ConnectionState> {
    Json(state.live.connection.state())
}

pub async fn connect(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.live.connection.connect().await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn disconnect(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.live.connection.disconnect().await?;
    Ok(StatusCode::ACCEPTED)
}

/// Manual reconnects start the backoff over
pub async fn reconnect(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state
        .live
        .connection
        .reconnect(ReconnectMode::ResetBackoff)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQueryParams {
    #[serde(default)]
    pub source: StoreSource,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    /// Comma separated field names
    pub fields: Option<String>,
    pub limit: Option<usize>,
    pub sort_by: Option<TelemetryField>,
    pub sort_direction: Option<SortDirection>,
}

impl HistoryQueryParams {
    fn into_filter(self) -> Result<QueryFilter, ApiError> {
        for (name, bound) in [("min_value", self.min_value), ("max_value", self.max_value)] {
            if bound.is_some_and(|v| !v.is_finite()) {
                return Err(ApiError::BadRequest(format!("{} must be a finite number", name)));
            }
        }

        let fields = self
            .fields
            .map(|list| {
                list.split(',')
                    .filter(|name| !name.trim().is_empty())
                    .map(str::parse::<TelemetryField>)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
            .map_err(ApiError::BadRequest)?;

        Ok(QueryFilter {
            start_time: self.start_time,
            end_time: self.end_time,
            min_value: self.min_value,
            max_value: self.max_value,
            fields,
            limit: self.limit,
            sort_by: self.sort_by,
            sort_direction: self.sort_direction,
        })
    }
}

pub async fn history_query(
    Query(params): Query<HistoryQueryParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueryResult>, ApiError> {
    let source = params.source;
    let filter = params.into_filter()?;
    let result = state.store(source).lock().query_range(&filter);
    Ok(Json(QueryResult::clone(&result)))
}

#[derive(Debug, Default, Deserialize)]
pub struct SourceParams {
    #[serde(default)]
    pub source: StoreSource,
}

pub async fn history_at(
    Path(timestamp): Path<u64>,
    Query(params): Query<SourceParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<TimestampMatch>, ApiError> {
    state
        .store(params.source)
        .lock()
        .query_by_timestamp(timestamp)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no sample at or before {}", timestamp)))
}

#[derive(Debug, Deserialize)]
pub struct SeriesParams {
    #[serde(default)]
    pub source: StoreSource,
    pub field: TelemetryField,
    pub points: Option<usize>,
    pub strategy: Option<CullingStrategy>,
    pub min_lap: Option<f64>,
    pub max_lap: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    pub series: VirtualizedSeries,
    pub metrics: CompressionMetrics,
}

/// Downsampled chart series for one telemetry field, x being the timestamp
pub async fn history_series(
    Query(params): Query<SeriesParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<SeriesResponse>, ApiError> {
    if params.points == Some(0) {
        return Err(ApiError::BadRequest("points must be greater than zero".to_string()));
    }

    let points = state.store(params.source).lock().to_series(params.field);

    let mut engine = VirtualizationEngine::new(SamplingConfig {
        max_visible_points: params.points.unwrap_or(state.sampling.max_visible_points),
        culling_strategy: params.strategy.unwrap_or(state.sampling.culling_strategy),
    });
    engine.set_filter(SeriesFilter {
        min_lap: params.min_lap,
        max_lap: params.max_lap,
        visible_series: None,
    });
    engine.upsert_series(VirtualizedSeries::new(
        params.field.as_str().to_string(),
        params.field.to_string(),
        None,
        points,
    ));

    let metrics = engine.metrics();
    let series = engine
        .series()
        .first()
        .cloned()
        .ok_or_else(|| ApiError::NotFound("no series".to_string()))?;
    Ok(Json(SeriesResponse { series, metrics }))
}

#[derive(Debug, Serialize)]
pub struct PlaybackView {
    #[serde(flatten)]
    pub state: PlaybackState,
    pub frame: Option<TelemetrySample>,
}

fn playback_view(state: &AppState) -> PlaybackView {
    let playback = state.playback.state();
    let frame = state
        .session_store
        .lock()
        .sample_at_position(playback.current_index)
        .copied();
    PlaybackView {
        state: playback,
        frame,
    }
}

pub async fn playback_state(State(state): State<Arc<AppState>>) -> Json<PlaybackView> {
    Json(playback_view(&state))
}

pub async fn playback_command(
    State(state): State<Arc<AppState>>,
    Json(command): Json<PlaybackCommand>,
) -> Result<Json<PlaybackView>, ApiError> {
    let mut updates = state.playback.subscribe();
    updates.borrow_and_update();

    if !state.playback.apply(command).await {
        return Err(ApiError::Unavailable);
    }
    // Give the service a moment to apply the command before reporting back.
    let _ = tokio::time::timeout(std::time::Duration::from_millis(50), updates.changed()).await;
    Ok(Json(playback_view(&state)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_query(query: &str) -> HistoryQueryParams {
        let uri: axum::http::Uri = format!("/history/query?{}", query).parse().expect("uri");
        Query::<HistoryQueryParams>::try_from_uri(&uri).expect("query").0
    }

    #[test]
    fn test_history_params_parse_field_list() {
        let params = HistoryQueryParams {
            fields: Some("speed, rpm,".to_string()),
            limit: Some(10),
            ..HistoryQueryParams::default()
        };
        let filter = params.into_filter().expect("valid");
        assert_eq!(filter.fields, Some(vec![TelemetryField::Speed, TelemetryField::Rpm]));
        assert_eq!(filter.limit, Some(10));
    }

    #[test]
    fn test_history_params_reject_unknown_field() {
        let params = HistoryQueryParams {
            fields: Some("speed,lap_time".to_string()),
            ..HistoryQueryParams::default()
        };
        assert!(matches!(params.into_filter(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_history_params_reject_non_finite_bounds() {
        let params = parse_query("min_value=NaN&sort_by=speed");
        assert!(matches!(params.into_filter(), Err(ApiError::BadRequest(_))));

        let params = HistoryQueryParams {
            max_value: Some(f64::INFINITY),
            ..HistoryQueryParams::default()
        };
        assert!(matches!(params.into_filter(), Err(ApiError::BadRequest(_))));

        let params = parse_query("source=live&min_value=100&sort_by=speed");
        assert_eq!(params.source, StoreSource::Live);
        assert_eq!(params.into_filter().expect("finite").min_value, Some(100.0));
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::NotFound("x".to_string()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::Unavailable.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
