use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Encoder {
    X264,
    X265,
    #[value(name = "libaom-av1")]
    LibaomAv1,
}

impl std::fmt::Display for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::X264 => write!(f, "x264"),
            Self::X265 => write!(f, "x265"),
            Self::LibaomAv1 => write!(f, "libaom-av1"),
        }
    }
}

impl Encoder {
    /// Name of the FFmpeg encoder passed to `-c:v`.
    #[must_use]
    pub const fn codec(&self) -> &'static str {
        match self {
            Self::X264 => "libx264",
            Self::X265 => "libx265",
            Self::LibaomAv1 => "libaom-av1",
        }
    }

    #[must_use]
    pub const fn supports_presets(&self) -> bool {
        !matches!(self, Self::LibaomAv1)
    }
}

/// Quality metrics that can be requested from libvmaf.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    Vmaf,
    Psnr,
    Ssim,
    MsSsim,
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Vmaf => write!(f, "VMAF"),
            Self::Psnr => write!(f, "PSNR"),
            Self::Ssim => write!(f, "SSIM"),
            Self::MsSsim => write!(f, "MS-SSIM"),
        }
    }
}

impl Metric {
    /// Key used for this metric in the libvmaf JSON log.
    #[must_use]
    pub const fn log_key(&self) -> &'static str {
        match self {
            Self::Vmaf => "vmaf",
            Self::Psnr => "psnr_y",
            Self::Ssim => "float_ssim",
            Self::MsSsim => "float_ms_ssim",
        }
    }

    #[must_use]
    pub fn from_log_key(key: &str) -> Option<Self> {
        [Self::Vmaf, Self::Psnr, Self::Ssim, Self::MsSsim]
            .into_iter()
            .find(|metric| metric.log_key() == key)
    }

    /// Name of the libvmaf feature extractor, if this metric needs one.
    #[must_use]
    pub const fn feature(&self) -> Option<&'static str> {
        match self {
            Self::Vmaf => None,
            Self::Psnr => Some("psnr"),
            Self::Ssim => Some("float_ssim"),
            Self::MsSsim => Some("float_ms_ssim"),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum FailurePolicy {
    /// Stop the sweep at the first failed job
    #[default]
    Abort,
    /// Record the failure and continue with the next job
    Skip,
}

#[derive(Clone, Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    /// Original video to transcode and compare against
    pub source: PathBuf,

    /// Video encoder to use
    #[arg(short, long, value_enum, default_value_t = Encoder::X264)]
    pub encoder: Encoder,

    /// Encoder parameter whose values will be compared (without the leading dash)
    #[arg(short, long, requires = "values")]
    pub parameter: Option<String>,

    /// Values of the parameter to compare, in the order they should be reported
    #[arg(short, long, num_args = 1..)]
    pub values: Vec<String>,

    /// Comma separated parameter combinations, e.g. "preset veryslow crf 18,preset slower crf 16"
    #[arg(short, long, value_delimiter = ',')]
    pub combinations: Vec<String>,

    /// CRF value(s) to compare
    #[arg(long, num_args = 1.., value_parser = clap::value_parser!(u8).range(0..=63))]
    pub crf: Vec<u8>,

    /// Preset(s) to compare
    #[arg(long, num_args = 1..)]
    pub preset: Vec<String>,

    /// Extra encoder options appended to every transcode, e.g. "-tune film"
    #[arg(long, allow_hyphen_values = true)]
    pub encoder_options: Option<String>,

    /// libaom-av1 quality/speed tradeoff used when cpu-used is not the compared parameter
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=8), default_value_t = 5)]
    pub av1_cpu_used: u8,

    /// FFmpeg video filter chain applied before encoding, e.g. "bwdif=mode=0,crop=1920:800:0:140"
    #[arg(long)]
    pub video_filters: Option<String>,

    /// Only use the first N seconds of the original video
    #[arg(short = 't', long, value_name = "SECONDS")]
    pub encode_length: Option<f64>,

    /// Build an overview video by taking a clip every N seconds
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=600))]
    pub interval: Option<u32>,

    /// Length in seconds of each overview clip
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=60), default_value_t = 1)]
    pub clip_length: u32,

    /// Calculate PSNR in addition to VMAF
    #[arg(long)]
    pub psnr: bool,

    /// Calculate SSIM in addition to VMAF
    #[arg(long)]
    pub ssim: bool,

    /// Calculate MS-SSIM in addition to VMAF
    #[arg(long)]
    pub ms_ssim: bool,

    /// Use the VMAF phone model
    #[arg(long)]
    pub phone_model: bool,

    /// Only compute metrics for every Nth frame
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..), default_value_t = 1)]
    pub subsample: u32,

    /// Number of threads libvmaf may use
    #[arg(long, default_value_t = default_threads())]
    pub n_threads: usize,

    /// Number of decimal places used in the report
    #[arg(long, default_value_t = 2)]
    pub decimal_places: usize,

    /// Output folder (defaults to the name of the original video)
    #[arg(short, long)]
    pub output_folder: Option<String>,

    /// Only compute metrics for an already transcoded video
    #[arg(long, requires = "transcoded_video")]
    pub no_transcoding_mode: bool,

    /// Transcoded video to measure in no transcoding mode
    #[arg(long)]
    pub transcoded_video: Option<PathBuf>,

    /// Log each FFmpeg command before running it
    #[arg(long)]
    pub show_commands: bool,

    /// What to do when a transcode or metric computation fails
    #[arg(long, value_enum, default_value_t = FailurePolicy::Abort)]
    pub on_failure: FailurePolicy,
}

fn default_threads() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

impl Config {
    /// Requested metrics in report order. VMAF is always first.
    #[must_use]
    pub fn metrics(&self) -> Vec<Metric> {
        let mut metrics = vec![Metric::Vmaf];

        if self.psnr {
            metrics.push(Metric::Psnr);
        }

        if self.ssim {
            metrics.push(Metric::Ssim);
        }

        if self.ms_ssim {
            metrics.push(Metric::MsSsim);
        }

        metrics
    }

    #[must_use]
    pub fn output_directory(&self) -> PathBuf {
        let name = self.output_folder.clone().unwrap_or_else(|| {
            self.source
                .file_name()
                .map_or_else(|| "output".to_owned(), |name| name.to_string_lossy().to_string())
        });

        PathBuf::from(sanitize(&name))
    }

    #[must_use]
    pub fn source_name(&self) -> String {
        file_name(&self.source)
    }
}

/// Replaces anything that is not an ASCII letter, digit, underscore or hyphen.
#[must_use]
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[must_use]
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.to_string_lossy().to_string(), |name| name.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("video-quality-sweep").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn metrics_keep_vmaf_first() {
        let config = parse(&["in.mp4", "--ms-ssim", "--psnr"]);

        assert_eq!(config.metrics(), vec![Metric::Vmaf, Metric::Psnr, Metric::MsSsim]);
    }

    #[rstest]
    #[case("vmaf", Some(Metric::Vmaf))]
    #[case("psnr_y", Some(Metric::Psnr))]
    #[case("float_ssim", Some(Metric::Ssim))]
    #[case("float_ms_ssim", Some(Metric::MsSsim))]
    #[case("psnr_cb", None)]
    fn log_keys_map_to_metrics(#[case] key: &str, #[case] expected: Option<Metric>) {
        assert_eq!(Metric::from_log_key(key), expected);
    }

    #[rstest]
    #[case("My Video.mp4", "My_Video_mp4")]
    #[case("clip-01_final", "clip-01_final")]
    #[case("a/b:c", "a_b_c")]
    fn sanitizes_folder_names(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize(input), expected);
    }

    #[test]
    fn output_directory_defaults_to_file_name() {
        let config = parse(&["videos/test clip.mkv", "-p", "preset", "-v", "fast"]);

        assert_eq!(config.output_directory(), PathBuf::from("test_clip_mkv"));
    }

    #[test]
    fn parses_combinations_and_encoder() {
        let config = parse(&[
            "in.mp4",
            "-e",
            "libaom-av1",
            "-c",
            "cpu-used 4 crf 30,cpu-used 6 crf 30",
        ]);

        assert_eq!(config.encoder, Encoder::LibaomAv1);
        assert_eq!(config.combinations, vec!["cpu-used 4 crf 30", "cpu-used 6 crf 30"]);
    }
}
