use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context as _;
use tracing::info;

use crate::config::Encoder;
use crate::context::Context;
use crate::error::SweepError;
use crate::ffmpeg::{self, VideoInfo};
use crate::util::{remove_stale, round, verify_filename};

pub const AV1_SPEED_FLAG: &str = "cpu-used";

/// How the compared value is applied to the encoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncodingMode {
    ConstantQuality { crf: String },
    NamedPreset { preset: String },
    Av1Speed { cpu_used: String },
    Parameter { name: String, value: String },
    Combination(Vec<(String, String)>),
}

impl EncodingMode {
    /// Maps a swept parameter to its mode. Only AV1 treats `cpu-used` as its speed knob.
    #[must_use]
    pub fn for_parameter(encoder: Encoder, name: &str, value: &str) -> Self {
        match name {
            "crf" => Self::ConstantQuality {
                crf: value.to_owned(),
            },
            "preset" => Self::NamedPreset {
                preset: value.to_owned(),
            },
            AV1_SPEED_FLAG if encoder == Encoder::LibaomAv1 => Self::Av1Speed {
                cpu_used: value.to_owned(),
            },
            _ => Self::Parameter {
                name: name.to_owned(),
                value: value.to_owned(),
            },
        }
    }

    fn pairs(&self) -> Vec<(String, String)> {
        match self {
            Self::ConstantQuality { crf } => vec![("crf".to_owned(), crf.clone())],
            Self::NamedPreset { preset } => vec![("preset".to_owned(), preset.clone())],
            Self::Av1Speed { cpu_used } => vec![(AV1_SPEED_FLAG.to_owned(), cpu_used.clone())],
            Self::Parameter { name, value } => vec![(name.clone(), value.clone())],
            Self::Combination(pairs) => pairs.clone(),
        }
    }
}

/// Everything needed to run one transcode. Built once by the planner.
#[derive(Clone, Debug, PartialEq)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub encoder: Encoder,
    pub mode: EncodingMode,
    /// Parameters held constant across the sweep.
    pub held: Vec<(String, String)>,
    pub options: Vec<String>,
    pub filters: Option<String>,
    pub av1_cpu_used: u8,
}

impl TranscodeRequest {
    /// FFmpeg writes here first; the file is renamed to `output` once complete.
    #[must_use]
    pub fn temporary_output(&self) -> PathBuf {
        let extension = self
            .output
            .extension()
            .map_or_else(|| "mkv".to_owned(), |extension| extension.to_string_lossy().to_string());

        self.output.with_extension(format!("tmp.{extension}"))
    }

    #[must_use]
    pub fn arguments(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![];

        args.extend(["-hide_banner", "-loglevel", "error", "-stats", "-y"].map(OsString::from));
        args.push("-i".into());
        args.push(self.input.clone().into());

        // First video stream is encoded, audio and subtitles are passed through.
        args.extend(
            ["-map", "0:V:0", "-map", "0:a?", "-map", "0:s?", "-c:a", "copy", "-c:s", "copy"]
                .map(OsString::from),
        );

        if let Some(filters) = &self.filters {
            args.push("-vf".into());
            args.push(filters.into());
        }

        args.push("-c:v".into());
        args.push(self.encoder.codec().into());
        args.extend(self.options.iter().map(OsString::from));

        let mut pairs = self.held.clone();
        pairs.extend(self.mode.pairs());

        if self.encoder == Encoder::LibaomAv1 {
            let speed = pairs
                .iter()
                .rev()
                .find(|(name, _)| name == AV1_SPEED_FLAG)
                .map_or_else(|| self.av1_cpu_used.to_string(), |(_, value)| value.clone());

            pairs.retain(|(name, _)| name != AV1_SPEED_FLAG);

            args.extend(["-b:v", "0"].map(OsString::from));
            args.push(format!("-{AV1_SPEED_FLAG}").into());
            args.push(speed.into());
        }

        for (name, value) in pairs {
            args.push(format!("-{name}").into());
            args.push(value.into());
        }

        args.push(self.temporary_output().into());

        args
    }
}

/// Result of a successful transcode.
#[derive(Clone, Debug, PartialEq)]
pub struct TranscodeOutcome {
    pub output: PathBuf,
    pub time_taken: f64,
}

/// Transcodes one job and times it. The output only appears at its final path when FFmpeg succeeded.
pub fn run(
    context: &Context,
    label: &str,
    request: &TranscodeRequest,
    source: &VideoInfo,
) -> anyhow::Result<TranscodeOutcome> {
    verify_filename(&request.output)
        .with_context(|| format!("Unable to verify transcode output path {:?}", request.output))?;

    let temporary_output = request.temporary_output();
    remove_stale(&temporary_output)?;
    remove_stale(&request.output)?;

    info!("Transcoding the video using {label}...");

    let progress_bar = context.progress_bar(source.frame_count(), "Transcoding...")?;
    let start = Instant::now();

    let result = ffmpeg::run(
        context,
        label,
        &request.arguments(),
        &progress_bar,
        Some(source.duration),
    );

    let time_taken = round(start.elapsed().as_secs_f64(), context.decimal_places);

    if let Err(err) = result {
        remove_stale(&temporary_output)?;
        return Err(err);
    }

    check_output(label, &temporary_output)?;

    std::fs::rename(&temporary_output, &request.output).with_context(|| {
        format!("Unable to rename {temporary_output:?} to {:?}", request.output)
    })?;

    info!("Time taken: {time_taken}s, output file: {:?}", request.output);

    Ok(TranscodeOutcome {
        output: request.output.clone(),
        time_taken,
    })
}

fn check_output(label: &str, path: &Path) -> anyhow::Result<()> {
    let size = std::fs::metadata(path).map(|metadata| metadata.len()).unwrap_or(0);

    if size == 0 {
        return Err(SweepError::Artifact {
            label: label.to_owned(),
            path: path.to_path_buf(),
            reason: "FFmpeg reported success but the output is missing or empty".to_owned(),
        }
        .into());
    }

    Ok(())
}
