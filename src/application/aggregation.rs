// Aggregation strategies applied by the telemetry queue to each drained batch
use crate::domain::telemetry::NumericFields;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SMOOTHING_FACTOR: f64 = 0.3;

/// Utilization below which the adaptive strategy picks `Average`.
const ADAPTIVE_LOW_WATERMARK: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStrategy {
    #[default]
    Latest,
    Average,
    Smooth,
    Median,
    Adaptive,
}

#[derive(Debug, Error, PartialEq)]
pub enum AggregationError {
    #[error("cannot aggregate an empty batch")]
    EmptyBatch,

    #[error("non-finite value in field {0}")]
    NonFinite(usize),
}

/// Pick the concrete strategy for `Adaptive` from current buffer utilization.
///
/// Under heavy load the cheapest strategy wins.
pub fn resolve_adaptive(utilization: f64, high_watermark: f64) -> ProcessStrategy {
    if utilization > high_watermark {
        ProcessStrategy::Latest
    } else if utilization >= ADAPTIVE_LOW_WATERMARK {
        ProcessStrategy::Smooth
    } else {
        ProcessStrategy::Average
    }
}

pub fn latest<T: NumericFields>(batch: &[T]) -> Result<T, AggregationError> {
    batch.last().cloned().ok_or(AggregationError::EmptyBatch)
}

/// Per-field mean. Non-numeric fields come from the last sample.
pub fn average<T: NumericFields>(batch: &[T]) -> Result<T, AggregationError> {
    let last = batch.last().ok_or(AggregationError::EmptyBatch)?;
    let columns = columns(batch)?;
    let means: Vec<f64> = columns
        .iter()
        .map(|column| column.iter().sum::<f64>() / column.len() as f64)
        .collect();
    Ok(last.with_numeric_values(&means))
}

/// Per-field median, robust against single-sample spikes.
pub fn median<T: NumericFields>(batch: &[T]) -> Result<T, AggregationError> {
    let last = batch.last().ok_or(AggregationError::EmptyBatch)?;
    let medians: Vec<f64> = columns(batch)?
        .into_iter()
        .map(|mut column| {
            column.sort_by(f64::total_cmp);
            let mid = column.len() / 2;
            if column.len() % 2 == 0 {
                (column[mid - 1] + column[mid]) / 2.0
            } else {
                column[mid]
            }
        })
        .collect();
    Ok(last.with_numeric_values(&medians))
}

/// One exponential-moving-average step toward the batch's latest sample.
///
/// `previous` is the last smoothed value; `None` seeds the average with the
/// latest sample itself.
pub fn smooth<T: NumericFields>(
    batch: &[T],
    previous: Option<&T>,
    alpha: f64,
) -> Result<T, AggregationError> {
    let latest = batch.last().ok_or(AggregationError::EmptyBatch)?;
    let target = finite_values(latest)?;

    let Some(previous) = previous else {
        return Ok(latest.clone());
    };

    let smoothed: Vec<f64> = previous
        .numeric_values()
        .into_iter()
        .zip(target)
        .map(|(prev, next)| prev + alpha * (next - prev))
        .collect();
    Ok(latest.with_numeric_values(&smoothed))
}

fn finite_values<T: NumericFields>(sample: &T) -> Result<Vec<f64>, AggregationError> {
    let values = sample.numeric_values();
    if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
        return Err(AggregationError::NonFinite(idx));
    }
    Ok(values)
}

/// Transpose a batch into one column per numeric field.
fn columns<T: NumericFields>(batch: &[T]) -> Result<Vec<Vec<f64>>, AggregationError> {
    let mut columns: Vec<Vec<f64>> = Vec::new();
    for sample in batch {
        let values = finite_values(sample)?;
        if columns.is_empty() {
            columns = values.iter().map(|_| Vec::with_capacity(batch.len())).collect();
        }
        for (column, value) in columns.iter_mut().zip(values) {
            column.push(value);
        }
    }
    if columns.is_empty() {
        return Err(AggregationError::EmptyBatch);
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::telemetry::TelemetrySample;

    fn sample(timestamp: u64, speed: f64) -> TelemetrySample {
        TelemetrySample::new(timestamp, speed, 50.0, 0.0, 5, 10000.0, false)
    }

    #[test]
    fn test_single_element_batches_are_identity() {
        let batch = vec![sample(7, 212.5)];
        assert_eq!(average(&batch).unwrap(), batch[0]);
        assert_eq!(median(&batch).unwrap(), batch[0]);
        assert_eq!(latest(&batch).unwrap(), batch[0]);
    }

    #[test]
    fn test_average_uses_latest_timestamp() {
        let batch = vec![sample(1, 100.0), sample(2, 200.0), sample(3, 300.0)];
        let avg = average(&batch).unwrap();
        assert_eq!(avg.speed, 200.0);
        assert_eq!(avg.timestamp, 3);
    }

    #[test]
    fn test_median_resists_outlier() {
        let mut batch: Vec<TelemetrySample> = (0..49).map(|i| sample(i, 100.0)).collect();
        batch.push(sample(49, 300.0));
        assert_eq!(median(&batch).unwrap().speed, 100.0);
    }

    #[test]
    fn test_median_of_even_batch_is_midpoint() {
        let batch = vec![sample(1, 100.0), sample(2, 300.0), sample(3, 200.0), sample(4, 400.0)];
        assert_eq!(median(&batch).unwrap().speed, 250.0);
    }

    #[test]
    fn test_smooth_with_unit_alpha_is_latest() {
        let previous = sample(1, 100.0);
        let batch = vec![sample(2, 180.0), sample(3, 240.0)];
        assert_eq!(smooth(&batch, Some(&previous), 1.0).unwrap(), batch[1]);
    }

    #[test]
    fn test_smooth_moves_fraction_toward_latest() {
        let previous = sample(1, 100.0);
        let batch = vec![sample(2, 200.0)];
        let smoothed = smooth(&batch, Some(&previous), 0.3).unwrap();
        assert!((smoothed.speed - 130.0).abs() < 1e-9);
        assert_eq!(smoothed.timestamp, 2);
    }

    #[test]
    fn test_smooth_seeds_from_first_sample() {
        let batch = vec![sample(2, 200.0)];
        assert_eq!(smooth(&batch, None, 0.3).unwrap(), batch[0]);
    }

    #[test]
    fn test_adaptive_resolution() {
        assert_eq!(resolve_adaptive(0.9, 0.8), ProcessStrategy::Latest);
        assert_eq!(resolve_adaptive(0.8, 0.8), ProcessStrategy::Smooth);
        assert_eq!(resolve_adaptive(0.5, 0.8), ProcessStrategy::Smooth);
        assert_eq!(resolve_adaptive(0.2, 0.8), ProcessStrategy::Average);
    }

    #[test]
    fn test_empty_and_non_finite_batches_fail() {
        let empty: Vec<TelemetrySample> = Vec::new();
        assert_eq!(average(&empty), Err(AggregationError::EmptyBatch));
        assert_eq!(latest(&empty), Err(AggregationError::EmptyBatch));

        let batch = vec![sample(1, f64::NAN)];
        assert_eq!(median(&batch), Err(AggregationError::NonFinite(0)));
    }
}
