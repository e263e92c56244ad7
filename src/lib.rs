use anyhow::Context as _;
use tracing::info;

pub mod config;
pub mod context;
pub mod error;
pub mod ffmpeg;
pub mod metrics;
pub mod plan;
pub mod reference;
pub mod report;
pub mod stats;
pub mod sweep;
pub mod transcode;
pub mod util;

use crate::context::{Context, Interrupt};
use crate::report::{Report, ReportMetadata};
use crate::sweep::{FfmpegStages, Settings, Stages};
use crate::util::HumanBitrate;

const REPORT_NAME: &str = "metrics_table.txt";

pub fn run(config: &config::Config) -> anyhow::Result<()> {
    let spec = plan::validate(config)?;

    let output_directory = config.output_directory();
    util::verify_directory(&output_directory).context("Failed to verify output directory")?;

    let interrupt = Interrupt::listen().context("Unable to install interrupt handler")?;
    let context = Context::new(config, interrupt);
    let stages = FfmpegStages::new(&context);
    let places = config.decimal_places;

    let original = stages
        .probe(&config.source)
        .with_context(|| format!("Unable to probe {:?}", config.source))?;
    let original_bitrate = format!("{:.places$}", HumanBitrate(original.bitrate()));

    info!("File: {}", config.source_name());
    info!("Bitrate: {original_bitrate}");
    info!(
        "Framerate: {} ({:.3})",
        original.frame_rate,
        original.frame_rate.as_f64()
    );

    let reference_path = reference::prepare(&context, config, &original, &output_directory)
        .context("Unable to prepare the reference video")?;
    let reference = if reference_path == config.source {
        original
    } else {
        stages
            .probe(&reference_path)
            .with_context(|| format!("Unable to probe {reference_path:?}"))?
    };

    let plan = plan::build(config, &spec, &reference_path, &output_directory);
    let settings = Settings::new(config);

    let metadata = ReportMetadata {
        original_name: config.source_name(),
        original_bitrate,
        encoder: plan.axis.is_some().then(|| config.encoder.to_string()),
        fixed: plan.fixed.clone(),
        encoder_options: plan
            .axis
            .as_ref()
            .and(config.encoder_options.clone()),
        filters: config.video_filters.clone(),
        subsample: config.subsample,
    };

    let mut report = Report::new(
        &output_directory.join(REPORT_NAME),
        plan.axis.clone(),
        settings.metrics.clone(),
        places,
        metadata,
    );

    let summary = sweep::run(&stages, &settings, &plan, &reference, &mut report)?;

    info!(
        "All done, {} of {} jobs completed. Results are in {:?}",
        summary.completed,
        plan.jobs.len(),
        report.path()
    );

    Ok(())
}
