use std::path::Path;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::config::{Config, FailurePolicy, Metric};
use crate::context::Context;
use crate::error::SweepError;
use crate::ffmpeg::{self, VideoInfo};
use crate::metrics::{self, MetricRequest};
use crate::plan::{Job, Plan};
use crate::report::{Report, ReportRow};
use crate::stats::{self, Reduction};
use crate::transcode::{self, TranscodeRequest};
use crate::util::{generate_stat_chart, round, HumanBitrate};

/// The external work a sweep depends on.
pub trait Stages {
    fn probe(&self, path: &Path) -> anyhow::Result<VideoInfo>;

    /// Transcodes one job, returning the time taken in seconds.
    fn transcode(
        &self,
        label: &str,
        request: &TranscodeRequest,
        reference: &VideoInfo,
    ) -> anyhow::Result<f64>;

    /// Writes the metric log to `request.log_path`.
    fn measure(
        &self,
        label: &str,
        request: &MetricRequest,
        reference: &VideoInfo,
    ) -> anyhow::Result<()>;

    fn is_interrupted(&self) -> bool;
}

/// Stages backed by the FFmpeg binary and libraries.
pub struct FfmpegStages<'a> {
    context: &'a Context,
}

impl<'a> FfmpegStages<'a> {
    #[must_use]
    pub const fn new(context: &'a Context) -> Self {
        Self { context }
    }
}

impl Stages for FfmpegStages<'_> {
    fn probe(&self, path: &Path) -> anyhow::Result<VideoInfo> {
        ffmpeg::probe(path)
    }

    fn transcode(
        &self,
        label: &str,
        request: &TranscodeRequest,
        reference: &VideoInfo,
    ) -> anyhow::Result<f64> {
        transcode::run(self.context, label, request, reference).map(|outcome| outcome.time_taken)
    }

    fn measure(
        &self,
        label: &str,
        request: &MetricRequest,
        reference: &VideoInfo,
    ) -> anyhow::Result<()> {
        metrics::run(self.context, label, request, reference).map(|_| ())
    }

    fn is_interrupted(&self) -> bool {
        self.context.interrupt.is_set()
    }
}

/// Per-run settings shared by every job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub metrics: Vec<Metric>,
    pub phone_model: bool,
    pub subsample: u32,
    pub threads: usize,
    pub filters: Option<String>,
    pub policy: FailurePolicy,
    pub decimal_places: usize,
}

impl Settings {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            metrics: config.metrics(),
            phone_model: config.phone_model,
            subsample: config.subsample,
            threads: config.n_threads,
            filters: config.video_filters.clone(),
            policy: config.on_failure,
            decimal_places: config.decimal_places,
        }
    }
}

/// What happened over a whole sweep.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Summary {
    pub completed: usize,
    pub skipped: Vec<String>,
    /// Mean of the primary metric across every completed job.
    pub mean: Option<f64>,
}

/// Returns the error back when the policy says the sweep must stop.
fn tolerate(settings: &Settings, label: &str, err: anyhow::Error) -> anyhow::Result<()> {
    let job_failure = err
        .downcast_ref::<SweepError>()
        .is_some_and(SweepError::is_job_failure);

    if job_failure && settings.policy == FailurePolicy::Skip {
        warn!("{label} failed, continuing: {err:#}");
        return Ok(());
    }

    error!("{label} failed: {err:#}");
    Err(err)
}

fn probe_output(stages: &impl Stages, job: &Job) -> anyhow::Result<VideoInfo> {
    stages.probe(&job.output_path).map_err(|err| {
        SweepError::Artifact {
            label: job.label.clone(),
            path: job.output_path.clone(),
            reason: format!("unable to probe: {err:#}"),
        }
        .into()
    })
}

fn metric_request(
    settings: &Settings,
    job: &Job,
    reference: &VideoInfo,
    distorted: &VideoInfo,
) -> MetricRequest {
    MetricRequest {
        reference: job.reference_path.clone(),
        distorted: job.output_path.clone(),
        log_path: job.metric_log_path.clone(),
        metrics: settings.metrics.clone(),
        phone_model: settings.phone_model,
        subsample: settings.subsample,
        threads: settings.threads,
        filters: settings.filters.clone(),
        scale: MetricRequest::scale_for(reference, distorted, settings.filters.as_deref()),
        frame_rate: reference.frame_rate,
    }
}

fn measure(
    stages: &impl Stages,
    settings: &Settings,
    job: &Job,
    request: &MetricRequest,
    reference: &VideoInfo,
) -> anyhow::Result<Reduction> {
    let frames = stages
        .measure(&job.label, request, reference)
        .and_then(|()| metrics::read_log(&job.label, &request.log_path));

    match frames {
        Ok(frames) => {
            let reduction = stats::reduce(&frames, &settings.metrics, settings.decimal_places);

            if reduction.is_empty() {
                warn!("The metric log for {} holds no frames", job.label);
            }

            Ok(reduction)
        }
        Err(err) => {
            tolerate(settings, &job.label, err)?;
            Ok(Reduction::empty(&settings.metrics))
        }
    }
}

fn draw_charts(settings: &Settings, job: &Job, reduction: &Reduction) {
    for series in &reduction.series {
        let title = format!("{} (n_subsample: {})", series.metric, settings.subsample);
        let path = job.directory.join(format!("{}.svg", series.metric));

        if let Err(err) =
            generate_stat_chart(&path, &title, &series.metric.to_string(), &series.points)
        {
            warn!("Unable to draw {path:?}: {err:#}");
        }
    }
}

/// Runs one job. `Ok(None)` means it failed and was skipped.
fn run_job(
    stages: &impl Stages,
    settings: &Settings,
    job: &Job,
    reference: &VideoInfo,
) -> anyhow::Result<Option<ReportRow>> {
    let time_taken = match &job.transcode {
        Some(request) => match stages.transcode(&job.label, request, reference) {
            Ok(time_taken) => Some(time_taken),
            Err(err) => {
                tolerate(settings, &job.label, err)?;
                return Ok(None);
            }
        },
        None => None,
    };

    let distorted = match probe_output(stages, job) {
        Ok(distorted) => distorted,
        Err(err) => {
            tolerate(settings, &job.label, err)?;
            return Ok(None);
        }
    };

    let places = settings.decimal_places;
    let bitrate = format!("{:.places$}", HumanBitrate(distorted.bitrate()));

    info!("{}: {bitrate}, {:.places$} MB", job.label, distorted.size_mb());

    let request = metric_request(settings, job, reference, &distorted);
    let reduction = measure(stages, settings, job, &request, reference)?;

    if let (Some(metric), Some(mean)) = (settings.metrics.first(), reduction.primary_mean()) {
        info!("{}: mean {metric} {mean:.places$}", job.label);
    }

    draw_charts(settings, job, &reduction);

    Ok(Some(ReportRow {
        label: job.label.clone(),
        time_taken,
        size_mb: round(distorted.size_mb(), places),
        bitrate,
        summaries: reduction.summaries,
    }))
}

fn run_jobs(
    stages: &impl Stages,
    settings: &Settings,
    plan: &Plan,
    reference: &VideoInfo,
    report: &mut Report,
    summary: &mut Summary,
) -> anyhow::Result<()> {
    for (index, job) in plan.jobs.iter().enumerate() {
        if stages.is_interrupted() {
            return Err(SweepError::Interrupted {
                label: job.label.clone(),
            }
            .into());
        }

        info!("Job {} of {}: {}", index + 1, plan.jobs.len(), job.label);

        match run_job(stages, settings, job, reference)? {
            Some(row) => {
                report.append_row(row)?;
                summary.completed += 1;
            }
            None => summary.skipped.push(job.label.clone()),
        }
    }

    Ok(())
}

/// Runs every job in plan order, appending a report row as each one completes.
///
/// The report is finalized even when the sweep stops early, covering the jobs that finished.
pub fn run(
    stages: &impl Stages,
    settings: &Settings,
    plan: &Plan,
    reference: &VideoInfo,
    report: &mut Report,
) -> anyhow::Result<Summary> {
    let start = Instant::now();
    let mut summary = Summary::default();

    let places = settings.decimal_places;

    let outcome = run_jobs(stages, settings, plan, reference, report, &mut summary);
    let finalized = report.finalize();

    match &finalized {
        Ok(Some(mean)) => info!("Overall mean: {mean:.places$}"),
        Ok(None) => {}
        Err(err) if outcome.is_err() => warn!("Unable to finalize the report: {err:#}"),
        Err(_) => {}
    }

    if !summary.skipped.is_empty() {
        warn!("Skipped after failing: {}", summary.skipped.join(", "));
    }

    info!("Total time: {:.places$}s", start.elapsed().as_secs_f64());

    outcome?;
    summary.mean = finalized?;

    Ok(summary)
}
