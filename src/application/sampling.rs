// Downsampling strategies for rendering large series
use crate::domain::series::SeriesPoint;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CullingStrategy {
    Uniform,
    #[default]
    Adaptive,
    Importance,
}

/// Reduce `data` to at most `target` representative points.
///
/// Returns `data` unchanged when it already fits. Output order always follows
/// input order and is deterministic for a given input.
pub fn downsample(data: &[SeriesPoint], target: usize, strategy: CullingStrategy) -> Vec<SeriesPoint> {
    if data.len() <= target {
        return data.to_vec();
    }
    if target == 0 {
        return Vec::new();
    }

    match strategy {
        CullingStrategy::Uniform => uniform(data, target),
        CullingStrategy::Adaptive => adaptive(data, target),
        CullingStrategy::Importance => importance(data, target),
    }
}

/// Evenly spaced indices, `step = len / target`.
fn uniform(data: &[SeriesPoint], target: usize) -> Vec<SeriesPoint> {
    let step = data.len() as f64 / target as f64;
    (0..target)
        .map(|i| data[((i as f64 * step).floor() as usize).min(data.len() - 1)])
        .collect()
}

/// Keeps both endpoints plus the interior points with the highest local
/// curvature `|left_delta - right_delta|`.
fn adaptive(data: &[SeriesPoint], target: usize) -> Vec<SeriesPoint> {
    let last = data.len() - 1;
    match target {
        1 => return vec![data[0]],
        2 => return vec![data[0], data[last]],
        _ => {}
    }

    let mut scored: Vec<(usize, f64)> = (1..last)
        .map(|i| {
            let left = data[i].value - data[i - 1].value;
            let right = data[i + 1].value - data[i].value;
            (i, (left - right).abs())
        })
        .collect();

    // Stable sort: equal scores keep index order, so output is deterministic.
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut keep: Vec<usize> = scored.into_iter().take(target - 2).map(|(i, _)| i).collect();
    keep.sort_unstable();

    let mut out = Vec::with_capacity(target);
    out.push(data[0]);
    out.extend(keep.into_iter().map(|i| data[i]));
    out.push(data[last]);
    out
}

/// One point per `ceil(len / target)`-sized window: the one holding the window's median value.
fn importance(data: &[SeriesPoint], target: usize) -> Vec<SeriesPoint> {
    let window = data.len().div_ceil(target);

    data.chunks(window)
        .map(|chunk| {
            let mut order: Vec<usize> = (0..chunk.len()).collect();
            order.sort_by(|&a, &b| chunk[a].value.total_cmp(&chunk[b].value));
            chunk[order[(chunk.len() - 1) / 2]]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> Vec<SeriesPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| SeriesPoint::new(i as f64, v))
            .collect()
    }

    fn laps(points: &[SeriesPoint]) -> Vec<f64> {
        points.iter().map(|p| p.lap).collect()
    }

    #[test]
    fn test_small_input_is_returned_unchanged() {
        let data = series(&[1.0, 5.0, 2.0]);
        for strategy in [
            CullingStrategy::Uniform,
            CullingStrategy::Adaptive,
            CullingStrategy::Importance,
        ] {
            assert_eq!(downsample(&data, 3, strategy), data);
            assert_eq!(downsample(&data, 10, strategy), data);
        }
    }

    #[test]
    fn test_uniform_spacing() {
        let data = series(&(0..100).map(|i| i as f64).collect::<Vec<_>>());
        let sampled = downsample(&data, 4, CullingStrategy::Uniform);
        assert_eq!(laps(&sampled), vec![0.0, 25.0, 50.0, 75.0]);
    }

    #[test]
    fn test_adaptive_keeps_endpoints_and_spikes() {
        let mut values = vec![10.0; 50];
        values[17] = 90.0;
        values[33] = -40.0;
        let data = series(&values);

        let sampled = downsample(&data, 4, CullingStrategy::Adaptive);
        assert_eq!(laps(&sampled), vec![0.0, 17.0, 33.0, 49.0]);
    }

    #[test]
    fn test_adaptive_always_includes_endpoints() {
        for len in 3..40 {
            let data = series(&(0..len).map(|i| ((i * 7) % 5) as f64).collect::<Vec<_>>());
            for target in 1..len {
                let sampled = downsample(&data, target, CullingStrategy::Adaptive);
                assert!(sampled.len() <= target);
                assert_eq!(sampled[0], data[0]);
                if target >= 2 {
                    assert_eq!(sampled[sampled.len() - 1], data[data.len() - 1]);
                }
            }
        }
    }

    #[test]
    fn test_adaptive_ties_are_deterministic() {
        let data = series(&(0..20).map(|i| if i % 2 == 0 { 0.0 } else { 1.0 }).collect::<Vec<_>>());
        let first = downsample(&data, 5, CullingStrategy::Adaptive);
        let second = downsample(&data, 5, CullingStrategy::Adaptive);
        assert_eq!(first, second);
        assert_eq!(laps(&first), vec![0.0, 1.0, 2.0, 3.0, 19.0]);
    }

    #[test]
    fn test_importance_picks_window_median() {
        let data = series(&[5.0, 1.0, 3.0, 100.0, 7.0, 6.0, 2.0, 4.0, 0.0]);
        let sampled = downsample(&data, 3, CullingStrategy::Importance);

        // windows: [5,1,3] [100,7,6] [2,4,0]
        let values: Vec<f64> = sampled.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![3.0, 7.0, 2.0]);
        assert_eq!(laps(&sampled), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_importance_never_exceeds_target() {
        let data = series(&(0..1001).map(|i| (i as f64).sin()).collect::<Vec<_>>());
        for target in [1, 7, 100, 999] {
            assert!(downsample(&data, target, CullingStrategy::Importance).len() <= target);
        }
    }

    #[test]
    fn test_zero_target_is_empty() {
        let data = series(&[1.0, 2.0]);
        assert!(downsample(&data, 0, CullingStrategy::Uniform).is_empty());
    }
}
