use std::fmt::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context};
use indicatif::{HumanDuration, ProgressState, ProgressStyle};
use number_prefix::NumberPrefix;
use plotters::prelude::*;
use tracing::{error, level_filters::LevelFilter};
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const CHART_SIZE: (u32, u32) = (1600, 900);

#[allow(clippy::as_conversions)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_precision_loss)]
#[allow(clippy::cast_sign_loss)]
pub fn create_progress_style(template: &str) -> anyhow::Result<ProgressStyle> {
    let progress_style = ProgressStyle::with_template(template)
        .with_context(|| format!("Unable to create progress bar style with template '{template}'"))?
        .with_key("smooth_eta", |s: &ProgressState, w: &mut dyn Write| {
            match (s.pos(), s.len()) {
                (pos, Some(len)) if pos > 0 && len > pos => write!(
                    w,
                    "{:#}",
                    HumanDuration(Duration::from_millis(
                        (s.elapsed().as_millis() as f64 * (len as f64 - pos as f64) / pos as f64)
                            .round() as u64
                    ))
                ),
                _ => write!(w, "-"),
            }
            .unwrap_or_else(|err| {
                error!("Unexpected error while formatting smooth_eta in progress bar: {err}");
            });
        })
        .with_key("smooth_per_sec", |s: &ProgressState, w: &mut dyn Write| {
            match (s.pos(), s.elapsed().as_millis()) {
                (pos, elapsed_ms) if elapsed_ms > 0 => {
                    write!(w, "{:.2}", pos as f64 * 1000_f64 / elapsed_ms as f64)
                }
                _ => write!(w, "-"),
            }
            .unwrap_or_else(|err| {
                error!("Unexpected error while formatting smooth_per_sec in progress bar: {err}");
            });
        });

    Ok(progress_style)
}

pub fn install_tracing() -> anyhow::Result<()> {
    ffmpeg::util::log::set_level(ffmpeg::util::log::level::Level::Fatal);

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .context("Unable to initialize global default subscriber")?;

    Ok(())
}

pub fn verify_filename(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Unable to create directory {parent:?}"))?;
    }

    Ok(())
}

pub fn verify_directory(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(anyhow!("{path:?} exists but is not a directory"));
        }
    } else {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Unable to create directory {path:?}"))?;
    }

    Ok(())
}

/// Removes a file if it exists.
pub fn remove_stale(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        std::fs::remove_file(path).with_context(|| format!("Unable to remove {path:?}"))?;
    }

    Ok(())
}

#[allow(clippy::as_conversions)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_possible_wrap)]
#[must_use]
pub fn round(value: f64, decimal_places: usize) -> f64 {
    let factor = 10_f64.powi(decimal_places as i32);
    (value * factor).round() / factor
}

/// Bitrate in bits per second, formatted with a decimal prefix.
///
/// The formatter precision controls the number of decimal places.
pub struct HumanBitrate(pub f64);

impl std::fmt::Display for HumanBitrate {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let precision = f.precision().unwrap_or(2);

        match NumberPrefix::decimal(self.0) {
            NumberPrefix::Standalone(bits) => write!(f, "{bits:.precision$} bps"),
            NumberPrefix::Prefixed(prefix, value) => write!(f, "{value:.precision$} {prefix}bps"),
        }
    }
}

/// Draws a per-frame line chart of a single metric.
pub fn generate_stat_chart(
    path: &Path,
    title: &str,
    y_description: &str,
    points: &[(u64, f64)],
) -> anyhow::Result<()> {
    verify_filename(path)?;

    let x_max = points.last().map_or(1, |(frame, _)| (*frame).max(1));
    let (y_min, y_max) = points
        .iter()
        .fold((f64::MAX, f64::MIN), |(low, high), (_, value)| {
            (low.min(*value), high.max(*value))
        });
    let (y_min, y_max) = if y_min > y_max { (0.0, 1.0) } else { (y_min, y_max) };
    let padding = ((y_max - y_min) * 0.05).max(0.01);

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)
        .with_context(|| format!("Unable to initialize chart {path:?}"))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 32))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(80)
        .build_cartesian_2d(0..x_max, (y_min - padding)..(y_max + padding))
        .with_context(|| format!("Unable to build chart {path:?}"))?;

    chart
        .configure_mesh()
        .x_desc("Frame Number")
        .y_desc(y_description)
        .draw()
        .context("Unable to draw chart mesh")?;

    chart
        .draw_series(LineSeries::new(points.iter().copied(), &BLUE))
        .context("Unable to draw chart series")?;

    root.present()
        .with_context(|| format!("Unable to write chart {path:?}"))?;

    Ok(())
}

/// Draws one bar per labelled value, annotated with the value, plus a line at the mean.
/// Missing values keep their slot and are annotated `N/A`.
#[allow(clippy::too_many_arguments)]
pub fn generate_bar_chart(
    path: &Path,
    title: &str,
    x_description: &str,
    y_description: &str,
    bars: &[(String, Option<f64>)],
    mean: f64,
    decimal_places: usize,
) -> anyhow::Result<()> {
    verify_filename(path)?;

    let y_max = bars
        .iter()
        .filter_map(|(_, value)| *value)
        .fold(mean, f64::max)
        .max(1.0)
        * 1.1;

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)
        .with_context(|| format!("Unable to initialize chart {path:?}"))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 32))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(80)
        .build_cartesian_2d((0..bars.len()).into_segmented(), 0.0..y_max)
        .with_context(|| format!("Unable to build chart {path:?}"))?;

    let label = |value: &SegmentValue<usize>| match value {
        SegmentValue::Exact(index) | SegmentValue::CenterOf(index) => bars
            .get(*index)
            .map(|(label, _)| label.clone())
            .unwrap_or_default(),
        SegmentValue::Last => String::new(),
    };

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc(x_description)
        .y_desc(y_description)
        .x_label_formatter(&label)
        .draw()
        .context("Unable to draw chart mesh")?;

    chart
        .draw_series(bars.iter().enumerate().filter_map(|(index, (_, value))| {
            let mut bar = Rectangle::new(
                [
                    (SegmentValue::Exact(index), 0.0),
                    (SegmentValue::Exact(index + 1), (*value)?),
                ],
                BLUE.mix(0.6).filled(),
            );
            bar.set_margin(0, 0, 10, 10);
            Some(bar)
        }))
        .context("Unable to draw chart bars")?;

    chart
        .draw_series(bars.iter().enumerate().map(|(index, (_, value))| {
            Text::new(
                value.map_or_else(|| "N/A".to_owned(), |value| format!("{value:.decimal_places$}")),
                (SegmentValue::CenterOf(index), value.unwrap_or(0.0)),
                ("sans-serif", 20).into_font(),
            )
        }))
        .context("Unable to annotate chart bars")?;

    chart
        .draw_series(std::iter::once(PathElement::new(
            vec![(SegmentValue::Exact(0), mean), (SegmentValue::Last, mean)],
            RED.stroke_width(2),
        )))
        .context("Unable to draw chart mean")?
        .label(format!("Mean: {mean:.decimal_places$}"))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .context("Unable to draw chart legend")?;

    root.present()
        .with_context(|| format!("Unable to write chart {path:?}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(8.164_965, 2, 8.16)]
    #[case(90.0, 2, 90.0)]
    #[case(1.005, 0, 1.0)]
    #[case(12.3456, 3, 12.346)]
    fn rounds_to_decimal_places(#[case] value: f64, #[case] places: usize, #[case] expected: f64) {
        assert!((round(value, places) - expected).abs() < 1e-9);
    }

    #[rstest]
    #[case(950.0, "950.00 bps")]
    #[case(4_520_000.0, "4.52 Mbps")]
    #[case(128_000.0, "128.00 kbps")]
    fn formats_bitrates(#[case] bps: f64, #[case] expected: &str) {
        assert_eq!(format!("{:.2}", HumanBitrate(bps)), expected);
    }

    #[test]
    fn writes_charts() {
        let directory = tempfile::tempdir().unwrap();
        let line = directory.path().join("VMAF.svg");
        let bars = directory.path().join("bars.svg");

        generate_stat_chart(&line, "VMAF (n_subsample: 1)", "VMAF", &[(0, 80.0), (1, 90.0)])
            .unwrap();
        generate_bar_chart(
            &bars,
            "preset vs VMAF",
            "preset",
            "VMAF",
            &[("fast".to_owned(), Some(91.0)), ("slow".to_owned(), None)],
            92.75,
            2,
        )
        .unwrap();

        assert!(std::fs::read_to_string(line).unwrap().contains("<svg"));
        assert!(std::fs::read_to_string(bars).unwrap().contains("<svg"));
    }
}
