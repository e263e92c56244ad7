use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use prettytable::{Cell, Row, Table};
use tracing::info;

use crate::config::{sanitize, Metric};
use crate::stats::MetricSummary;
use crate::util::{generate_bar_chart, round};

const PLACEHOLDER: &str = "N/A";

/// One completed job.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportRow {
    pub label: String,
    /// Absent when the video was not transcoded by this run.
    pub time_taken: Option<f64>,
    pub size_mb: f64,
    pub bitrate: String,
    /// Aligned with the report's metric columns.
    pub summaries: Vec<Option<MetricSummary>>,
}

impl ReportRow {
    #[must_use]
    pub fn primary_mean(&self) -> Option<f64> {
        self.summaries
            .first()
            .copied()
            .flatten()
            .map(|summary| summary.mean)
    }
}

/// Facts about the run written below the table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReportMetadata {
    pub original_name: String,
    pub original_bitrate: String,
    pub encoder: Option<String>,
    /// Parameters passed unchanged to every transcode.
    pub fixed: Vec<(String, String)>,
    pub encoder_options: Option<String>,
    pub filters: Option<String>,
    pub subsample: u32,
}

impl std::fmt::Display for ReportMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "Original File: {}", self.original_name)?;
        writeln!(f, "Original Bitrate: {}", self.original_bitrate)?;

        if let Some(encoder) = &self.encoder {
            writeln!(f, "Encoder: {encoder}")?;
        }

        for (name, value) in &self.fixed {
            writeln!(f, "{name}: {value}")?;
        }

        if let Some(options) = &self.encoder_options {
            writeln!(f, "Encoder Options: {options}")?;
        }

        writeln!(f, "Filters: {}", self.filters.as_deref().unwrap_or("None"))?;
        writeln!(f, "n_subsample: {}", self.subsample)
    }
}

/// The comparison table. Rewritten in full after every row so an interrupted
/// sweep still leaves a valid report of the jobs that finished.
pub struct Report {
    path: PathBuf,
    axis: Option<String>,
    metrics: Vec<Metric>,
    decimal_places: usize,
    metadata: ReportMetadata,
    rows: Vec<ReportRow>,
}

impl Report {
    #[must_use]
    pub fn new(
        path: &Path,
        axis: Option<String>,
        metrics: Vec<Metric>,
        decimal_places: usize,
        metadata: ReportMetadata,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            axis,
            metrics,
            decimal_places,
            metadata,
            rows: vec![],
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    #[must_use]
    pub fn header(&self) -> Vec<String> {
        let mut header = vec![];

        if let Some(axis) = &self.axis {
            header.push(axis.clone());
            header.push("Encoding Time (s)".to_owned());
        }

        header.push("Size".to_owned());
        header.push("Bitrate".to_owned());
        header.extend(self.metrics.iter().map(ToString::to_string));

        header
    }

    #[must_use]
    pub fn cells(&self, row: &ReportRow) -> Vec<String> {
        let places = self.decimal_places;
        let mut cells = vec![];

        if self.axis.is_some() {
            cells.push(row.label.clone());
            cells.push(
                row.time_taken
                    .map_or_else(|| PLACEHOLDER.to_owned(), |time| format!("{time:.places$}")),
            );
        }

        cells.push(format!("{:.places$} MB", row.size_mb));
        cells.push(row.bitrate.clone());

        for index in 0..self.metrics.len() {
            cells.push(
                row.summaries
                    .get(index)
                    .copied()
                    .flatten()
                    .map_or_else(|| PLACEHOLDER.to_owned(), |summary| format!("{summary:.places$}")),
            );
        }

        cells
    }

    #[must_use]
    pub fn title(&self) -> String {
        format!(
            "{} values are in the format: Min | Standard Deviation | Mean",
            self.metrics
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("/")
        )
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut table = Table::new();

        table.set_titles(Row::new(self.header().iter().map(|name| Cell::new(name)).collect()));

        for row in &self.rows {
            table.add_row(Row::new(
                self.cells(row).iter().map(|cell| Cell::new(cell)).collect(),
            ));
        }

        format!("{}\n{table}\n{}", self.title(), self.metadata)
    }

    pub fn append_row(&mut self, row: ReportRow) -> anyhow::Result<()> {
        self.rows.push(row);
        self.write()?;

        info!("{:?} has been updated.", self.path);

        Ok(())
    }

    pub fn write(&self) -> anyhow::Result<()> {
        let temporary_path = self.path.with_extension("tmp.txt");

        fs::write(&temporary_path, self.render())
            .with_context(|| format!("Unable to write report {temporary_path:?}"))?;

        fs::rename(&temporary_path, &self.path).with_context(|| {
            format!("Unable to rename {temporary_path:?} to {:?}", self.path)
        })?;

        Ok(())
    }

    /// Mean of the primary metric over every row that has one.
    #[allow(clippy::as_conversions)]
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn overall_mean(&self) -> Option<f64> {
        let means = self
            .rows
            .iter()
            .filter_map(ReportRow::primary_mean)
            .collect::<Vec<_>>();

        (!means.is_empty())
            .then(|| round(means.iter().sum::<f64>() / means.len() as f64, self.decimal_places))
    }

    /// Draws the bar chart of the primary metric per job next to the report. Returns the overall mean.
    pub fn finalize(&self) -> anyhow::Result<Option<f64>> {
        let (Some(axis), Some(metric), Some(mean)) =
            (&self.axis, self.metrics.first(), self.overall_mean())
        else {
            return Ok(None);
        };

        let bars = self
            .rows
            .iter()
            .map(|row| (row.label.clone(), row.primary_mean()))
            .collect::<Vec<_>>();

        let title = format!("{axis} vs {metric}");
        let directory = self.path.parent().unwrap_or_else(|| Path::new("."));

        generate_bar_chart(
            &directory.join(format!("{}.svg", sanitize(&title))),
            &title,
            axis,
            &metric.to_string(),
            &bars,
            mean,
            self.decimal_places,
        )
        .with_context(|| format!("Unable to generate {title} chart"))?;

        Ok(Some(mean))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(metric: Metric, mean: f64) -> MetricSummary {
        MetricSummary {
            metric,
            min: mean - 10.0,
            std: 2.5,
            mean,
        }
    }

    fn row(label: &str, vmaf: Option<f64>, psnr: Option<f64>) -> ReportRow {
        ReportRow {
            label: label.to_owned(),
            time_taken: Some(12.5),
            size_mb: 3.25,
            bitrate: "2.60 Mbps".to_owned(),
            summaries: vec![
                vmaf.map(|mean| summary(Metric::Vmaf, mean)),
                psnr.map(|mean| summary(Metric::Psnr, mean)),
            ],
        }
    }

    fn report(path: &Path, axis: Option<&str>) -> Report {
        Report::new(
            path,
            axis.map(ToOwned::to_owned),
            vec![Metric::Vmaf, Metric::Psnr],
            2,
            ReportMetadata {
                original_name: "in.mkv".to_owned(),
                original_bitrate: "8.00 Mbps".to_owned(),
                encoder: Some("libaom-av1".to_owned()),
                fixed: vec![("cpu-used".to_owned(), "5".to_owned())],
                encoder_options: Some("-tune 0".to_owned()),
                filters: None,
                subsample: 1,
            },
        )
    }

    #[test]
    fn missing_metrics_keep_column_count() {
        let report = report(Path::new("table.txt"), Some("crf"));

        let full = report.cells(&row("18", Some(95.0), Some(44.0)));
        let missing = report.cells(&row("23", Some(92.0), None));

        assert_eq!(report.header().len(), 6);
        assert_eq!(full.len(), 6);
        assert_eq!(missing.len(), 6);
        assert_eq!(missing[5], "N/A");
        assert_eq!(full[4], "85.00 | 2.50 | 95.00");
    }

    #[test]
    fn metrics_only_mode_drops_label_and_time() {
        let report = report(Path::new("table.txt"), None);

        assert_eq!(report.header(), vec!["Size", "Bitrate", "VMAF", "PSNR"]);
        assert_eq!(report.cells(&row("x", Some(95.0), None))[0], "3.25 MB");
    }

    #[test]
    fn rewrites_the_whole_table_per_row() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("metrics_table.txt");
        let mut report = report(&path, Some("crf"));

        report.append_row(row("18", Some(95.0), Some(44.0))).unwrap();
        let first = fs::read_to_string(&path).unwrap();
        report.append_row(row("23", Some(92.0), Some(42.0))).unwrap();
        let second = fs::read_to_string(&path).unwrap();

        assert!(first.starts_with("VMAF/PSNR values are in the format: Min | Standard Deviation | Mean"));
        assert!(first.contains("| 18 "));
        assert!(!first.contains("| 23 "));
        assert!(second.contains("| 18 ") && second.contains("| 23 "));
        assert!(second.contains("Original File: in.mkv"));
        assert!(second.contains("Encoder: libaom-av1"));
        assert!(second.contains("cpu-used: 5"));
        assert!(second.contains("Encoder Options: -tune 0"));
        assert!(second.contains("n_subsample: 1"));
        assert!(!directory.path().join("metrics_table.tmp.txt").exists());
    }

    #[test]
    fn finalize_charts_the_primary_mean() {
        let directory = tempfile::tempdir().unwrap();
        let mut report = report(&directory.path().join("metrics_table.txt"), Some("crf"));

        report.append_row(row("18", Some(95.0), None)).unwrap();
        report.append_row(row("23", None, None)).unwrap();
        report.append_row(row("28", Some(90.0), None)).unwrap();

        assert_eq!(report.finalize().unwrap(), Some(92.5));

        let chart = fs::read_to_string(directory.path().join("crf_vs_VMAF.svg")).unwrap();
        assert!(chart.contains("N/A"));
        assert!(chart.contains("95.00"));
        assert!(chart.contains("90.00"));
    }

    #[test]
    fn finalize_without_rows_draws_nothing() {
        let directory = tempfile::tempdir().unwrap();
        let report = report(&directory.path().join("metrics_table.txt"), Some("crf"));

        assert_eq!(report.finalize().unwrap(), None);
    }
}
