// Virtualization engine - keeps display-ready copies of chart series in sync with filters and options
use crate::application::sampling::{downsample, CullingStrategy};
use crate::domain::series::{SeriesPoint, VirtualizedSeries};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Per-series point budget.
    pub max_visible_points: usize,
    pub culling_strategy: CullingStrategy,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_visible_points: 1000,
            culling_strategy: CullingStrategy::Adaptive,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesFilter {
    pub min_lap: Option<f64>,
    pub max_lap: Option<f64>,
    /// `None` shows every series.
    pub visible_series: Option<HashSet<String>>,
}

impl SeriesFilter {
    fn shows(&self, series_id: &str) -> bool {
        self.visible_series
            .as_ref()
            .is_none_or(|visible| visible.contains(series_id))
    }

    fn keeps(&self, point: &SeriesPoint) -> bool {
        self.min_lap.is_none_or(|min| point.lap >= min)
            && self.max_lap.is_none_or(|max| point.lap <= max)
    }
}

/// Observability only: how much of the data is actually drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CompressionMetrics {
    pub total_points: usize,
    pub visible_points: usize,
    /// `visible_points / total_points`, 1.0 when there is no data.
    pub compression_ratio: f64,
}

pub struct VirtualizationEngine {
    config: SamplingConfig,
    filter: SeriesFilter,
    series: Vec<VirtualizedSeries>,
    metrics: CompressionMetrics,
}

impl VirtualizationEngine {
    pub fn new(config: SamplingConfig) -> Self {
        Self {
            config,
            filter: SeriesFilter::default(),
            series: Vec::new(),
            metrics: CompressionMetrics {
                compression_ratio: 1.0,
                ..CompressionMetrics::default()
            },
        }
    }

    pub fn config(&self) -> SamplingConfig {
        self.config
    }

    pub fn series(&self) -> &[VirtualizedSeries] {
        &self.series
    }

    pub fn metrics(&self) -> CompressionMetrics {
        self.metrics
    }

    pub fn set_series(&mut self, series: Vec<VirtualizedSeries>) {
        self.series = series;
        self.recompute();
    }

    /// Add a series, replacing any existing one with the same id.
    pub fn upsert_series(&mut self, series: VirtualizedSeries) {
        match self.series.iter_mut().find(|s| s.id == series.id) {
            Some(existing) => *existing = series,
            None => self.series.push(series),
        }
        self.recompute();
    }

    pub fn set_config(&mut self, config: SamplingConfig) {
        if config != self.config {
            self.config = config;
            self.recompute();
        }
    }

    pub fn set_filter(&mut self, filter: SeriesFilter) {
        if filter != self.filter {
            self.filter = filter;
            self.recompute();
        }
    }

    fn recompute(&mut self) {
        let mut total_points = 0;
        let mut visible_points = 0;

        for series in &mut self.series {
            total_points += series.original_data.len();

            series.virtualized_data = if self.filter.shows(&series.id) {
                let filtered: Vec<SeriesPoint> = series
                    .original_data
                    .iter()
                    .filter(|p| self.filter.keeps(p))
                    .copied()
                    .collect();
                downsample(
                    &filtered,
                    self.config.max_visible_points,
                    self.config.culling_strategy,
                )
            } else {
                Vec::new()
            };

            visible_points += series.virtualized_data.len();
        }

        let compression_ratio = if total_points == 0 {
            1.0
        } else {
            visible_points as f64 / total_points as f64
        };

        self.metrics = CompressionMetrics {
            total_points,
            visible_points,
            compression_ratio,
        };

        tracing::debug!(
            "Virtualized {} series: {}/{} points ({:.1}%)",
            self.series.len(),
            visible_points,
            total_points,
            compression_ratio * 100.0
        );
    }
}
