use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;
use tracing::info;

use crate::config::Metric;
use crate::context::Context;
use crate::error::SweepError;
use crate::ffmpeg::{self, FrameRate, VideoInfo};
use crate::util::{remove_stale, verify_filename};

const VMAF_MODEL: &str = "vmaf_v0.6.1";

/// One evaluated frame of a libvmaf log, keyed by canonical metric.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricFrame {
    pub frame_index: u64,
    pub metrics: BTreeMap<Metric, f64>,
}

#[derive(Deserialize)]
struct LibvmafFrame {
    #[serde(rename = "frameNum")]
    frame_num: u64,
    metrics: BTreeMap<String, f64>,
}

#[derive(Deserialize)]
struct LibvmafLog {
    frames: Vec<LibvmafFrame>,
}

/// Everything needed to compare one distorted video against the reference.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricRequest {
    pub reference: PathBuf,
    pub distorted: PathBuf,
    pub log_path: PathBuf,
    pub metrics: Vec<Metric>,
    pub phone_model: bool,
    pub subsample: u32,
    pub threads: usize,
    /// Filters applied to the reference so it matches the filtered transcode.
    pub filters: Option<String>,
    /// Resolution the distorted video is scaled to before comparison.
    pub scale: Option<(u32, u32)>,
    pub frame_rate: FrameRate,
}

impl MetricRequest {
    /// Scaling is only needed when the videos differ and no filter chain already governs geometry.
    #[must_use]
    pub fn scale_for(
        reference: &VideoInfo,
        distorted: &VideoInfo,
        filters: Option<&str>,
    ) -> Option<(u32, u32)> {
        let differs = (reference.width, reference.height) != (distorted.width, distorted.height);

        (differs && filters.is_none()).then_some((reference.width, reference.height))
    }

    /// libvmaf option string, escaped for the option parser but not yet for the graph parser.
    fn vmaf_options(&self) -> String {
        let model = if self.phone_model {
            format!("version={VMAF_MODEL}:enable_transform=true")
        } else {
            format!("version={VMAF_MODEL}")
        };

        let mut options = vec![
            "log_fmt=json".to_owned(),
            format!("log_path={}", escape_option(&self.log_path.to_string_lossy())),
            format!("n_subsample={}", self.subsample),
            format!("n_threads={}", self.threads),
            format!("model={}", escape_option(&model)),
        ];

        let features = self
            .metrics
            .iter()
            .filter_map(Metric::feature)
            .map(|feature| format!("name={feature}"))
            .collect::<Vec<_>>();

        if !features.is_empty() {
            options.push(format!("feature={}", features.join("|")));
        }

        options.join(":")
    }

    #[must_use]
    pub fn filtergraph(&self) -> String {
        let reference_filters = self
            .filters
            .as_ref()
            .map(|filters| format!("{filters},"))
            .unwrap_or_default();

        let scale = self
            .scale
            .map(|(width, height)| format!("scale={width}:{height}:flags=bicubic,"))
            .unwrap_or_default();

        format!(
            "[0:V]{reference_filters}setpts=PTS-STARTPTS[reference];\
             [1:V]{scale}setpts=PTS-STARTPTS[distorted];\
             [distorted][reference]libvmaf={}",
            escape_graph(&self.vmaf_options())
        )
    }

    /// Frames FFmpeg reports while measuring. Every frame passes through libvmaf,
    /// whatever the subsample factor.
    #[must_use]
    pub fn expected_frames(reference: &VideoInfo) -> Option<u64> {
        reference.frame_count()
    }

    #[must_use]
    pub fn arguments(&self) -> Vec<OsString> {
        let rate = self.frame_rate.to_string();
        let mut args: Vec<OsString> = vec![];

        args.extend(["-hide_banner", "-loglevel", "error", "-stats"].map(OsString::from));
        args.push("-r".into());
        args.push(rate.clone().into());
        args.push("-i".into());
        args.push(self.reference.clone().into());
        args.push("-r".into());
        args.push(rate.into());
        args.push("-i".into());
        args.push(self.distorted.clone().into());
        args.push("-lavfi".into());
        args.push(self.filtergraph().into());
        args.extend(["-f", "null", "-"].map(OsString::from));

        args
    }
}

fn escape_with(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());

    for c in value.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}

/// First level: a single option value, as read by the filter option parser.
fn escape_option(value: &str) -> String {
    escape_with(value, &['\\', '\'', ':'])
}

/// Second level: a filter's whole argument string, as read by the filtergraph parser.
fn escape_graph(arguments: &str) -> String {
    escape_with(arguments, &['\\', '\'', '[', ']', ',', ';'])
}

fn description(metrics: &[Metric]) -> String {
    let names = metrics.iter().map(ToString::to_string).collect::<Vec<_>>();

    match names.as_slice() {
        [] => String::new(),
        [single] => single.clone(),
        [rest @ .., last] => format!("{} and {last}", rest.join(", ")),
    }
}

/// Computes the requested metrics, returning the path of the libvmaf log.
pub fn run(
    context: &Context,
    label: &str,
    request: &MetricRequest,
    reference: &VideoInfo,
) -> anyhow::Result<PathBuf> {
    verify_filename(&request.log_path)
        .with_context(|| format!("Unable to verify metric log path {:?}", request.log_path))?;
    remove_stale(&request.log_path)?;

    info!("Computing the {} achieved with {label}...", description(&request.metrics));

    let progress_bar =
        context.progress_bar(MetricRequest::expected_frames(reference), "Computing metrics...")?;

    if let Err(err) = ffmpeg::run(
        context,
        label,
        &request.arguments(),
        &progress_bar,
        Some(reference.duration),
    ) {
        remove_stale(&request.log_path)?;
        return Err(err);
    }

    if !request.log_path.exists() {
        return Err(SweepError::Artifact {
            label: label.to_owned(),
            path: request.log_path.clone(),
            reason: "libvmaf did not write its log".to_owned(),
        }
        .into());
    }

    Ok(request.log_path.clone())
}

/// Parses a libvmaf JSON log. Keys without a canonical metric are dropped.
pub fn parse_log<R: Read>(reader: R) -> serde_json::Result<Vec<MetricFrame>> {
    let log: LibvmafLog = serde_json::from_reader(reader)?;

    Ok(log
        .frames
        .into_iter()
        .map(|frame| MetricFrame {
            frame_index: frame.frame_num,
            metrics: frame
                .metrics
                .into_iter()
                .filter_map(|(key, value)| Metric::from_log_key(&key).map(|metric| (metric, value)))
                .collect(),
        })
        .collect())
}

pub fn read_log(label: &str, path: &Path) -> anyhow::Result<Vec<MetricFrame>> {
    let artifact = |reason: String| SweepError::Artifact {
        label: label.to_owned(),
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|err| artifact(format!("unable to open: {err}")))?;

    Ok(parse_log(BufReader::new(file)).map_err(|err| artifact(format!("unable to parse: {err}")))?)
}
