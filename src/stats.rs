use statrs::statistics::Statistics;

use crate::config::Metric;
use crate::metrics::MetricFrame;
use crate::util::round;

/// Min, population standard deviation and mean of one metric over a job.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MetricSummary {
    pub metric: Metric,
    pub min: f64,
    pub std: f64,
    pub mean: f64,
}

/// Formats as `min | std | mean`, using the formatter precision for each value.
impl std::fmt::Display for MetricSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let precision = f.precision().unwrap_or(2);

        write!(
            f,
            "{:.precision$} | {:.precision$} | {:.precision$}",
            self.min, self.std, self.mean
        )
    }
}

/// Per-frame values of one metric, ready to be charted.
#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    pub metric: Metric,
    pub points: Vec<(u64, f64)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Reduction {
    /// One entry per requested metric, in request order. `None` when the log lacked the metric.
    pub summaries: Vec<Option<MetricSummary>>,
    pub series: Vec<Series>,
}

impl Reduction {
    /// A reduction with a placeholder for every requested metric.
    #[must_use]
    pub fn empty(requested: &[Metric]) -> Self {
        Self {
            summaries: vec![None; requested.len()],
            series: vec![],
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Mean of the first requested metric.
    #[must_use]
    pub fn primary_mean(&self) -> Option<f64> {
        self.summaries
            .first()
            .copied()
            .flatten()
            .map(|summary| summary.mean)
    }
}

pub fn summarize(metric: Metric, values: &[f64], decimal_places: usize) -> Option<MetricSummary> {
    if values.is_empty() {
        return None;
    }

    Some(MetricSummary {
        metric,
        min: round(Statistics::min(values), decimal_places),
        std: round(Statistics::population_std_dev(values), decimal_places),
        mean: round(Statistics::mean(values), decimal_places),
    })
}

/// Reduces a per-frame log to one summary per requested metric.
#[must_use]
pub fn reduce(frames: &[MetricFrame], requested: &[Metric], decimal_places: usize) -> Reduction {
    let mut summaries = Vec::with_capacity(requested.len());
    let mut series = vec![];

    for metric in requested {
        let points = frames
            .iter()
            .filter_map(|frame| {
                frame
                    .metrics
                    .get(metric)
                    .map(|value| (frame.frame_index, *value))
            })
            .collect::<Vec<_>>();

        let values = points.iter().map(|(_, value)| *value).collect::<Vec<_>>();
        summaries.push(summarize(*metric, &values, decimal_places));

        if !points.is_empty() {
            series.push(Series {
                metric: *metric,
                points,
            });
        }
    }

    Reduction { summaries, series }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn frame(frame_index: u64, values: &[(Metric, f64)]) -> MetricFrame {
        MetricFrame {
            frame_index,
            metrics: values.iter().copied().collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn reduces_to_min_std_mean() {
        let frames = [
            frame(0, &[(Metric::Vmaf, 80.0)]),
            frame(1, &[(Metric::Vmaf, 90.0)]),
            frame(2, &[(Metric::Vmaf, 100.0)]),
        ];

        let reduction = reduce(&frames, &[Metric::Vmaf], 2);
        let summary = reduction.summaries[0].unwrap();

        assert!((summary.min - 80.0).abs() < 1e-9);
        assert!((summary.std - 8.16).abs() < 1e-9);
        assert!((summary.mean - 90.0).abs() < 1e-9);
        assert_eq!(format!("{summary:.2}"), "80.00 | 8.16 | 90.00");
        assert_eq!(reduction.primary_mean(), Some(90.0));
    }

    #[test]
    fn missing_metrics_keep_their_slot() {
        let frames = [
            frame(0, &[(Metric::Vmaf, 95.0), (Metric::Ssim, 0.99)]),
            frame(5, &[(Metric::Vmaf, 97.0), (Metric::Ssim, 0.98)]),
        ];

        let reduction = reduce(&frames, &[Metric::Vmaf, Metric::Psnr, Metric::Ssim], 3);

        assert_eq!(reduction.summaries.len(), 3);
        assert!(reduction.summaries[0].is_some());
        assert!(reduction.summaries[1].is_none());
        assert_eq!(reduction.summaries[2].map(|summary| summary.metric), Some(Metric::Ssim));
        assert_eq!(reduction.series.len(), 2);
    }

    #[test]
    fn series_keep_subsampled_frame_indices() {
        let frames = [
            frame(0, &[(Metric::Vmaf, 90.0)]),
            frame(3, &[(Metric::Vmaf, 91.0)]),
            frame(6, &[(Metric::Vmaf, 92.0)]),
        ];

        let reduction = reduce(&frames, &[Metric::Vmaf], 2);

        assert_eq!(reduction.series[0].points, vec![(0, 90.0), (3, 91.0), (6, 92.0)]);
    }

    #[test]
    fn empty_log_yields_placeholders() {
        let reduction = reduce(&[], &[Metric::Vmaf, Metric::Psnr], 2);

        assert!(reduction.is_empty());
        assert_eq!(reduction, Reduction::empty(&[Metric::Vmaf, Metric::Psnr]));
        assert_eq!(reduction.primary_mean(), None);
    }
}
