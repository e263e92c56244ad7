use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::{file_name, sanitize, Config, Encoder};
use crate::error::SweepError;
use crate::transcode::{EncodingMode, TranscodeRequest, AV1_SPEED_FLAG};

const DEFAULT_CRF: &str = "23";
const DEFAULT_PRESET: &str = "medium";
const METRIC_LOG: &str = "per_frame_metrics.json";
const COMBINATION_AXIS: &str = "Combination";

/// A parsed combination such as `preset veryslow crf 18`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Combination {
    pairs: Vec<(String, String)>,
}

impl Combination {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let tokens = raw.split_whitespace().collect::<Vec<_>>();

        if tokens.is_empty() {
            return Err("Empty combination given".to_owned());
        }

        if tokens.len() % 2 != 0 {
            return Err(format!(
                "Combination '{raw}' must be a list of parameter/value pairs but has {} words",
                tokens.len()
            ));
        }

        let pairs = tokens
            .chunks_exact(2)
            .filter_map(|pair| match pair {
                [name, value] => Some((name.trim_start_matches('-').to_owned(), (*value).to_owned())),
                _ => None,
            })
            .collect();

        Ok(Self { pairs })
    }

    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Command-line form, e.g. `-preset veryslow -crf 18`.
    #[must_use]
    pub fn label(&self) -> String {
        self.pairs
            .iter()
            .map(|(name, value)| format!("-{name} {value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn directory_name(&self) -> String {
        sanitize(
            &self
                .pairs
                .iter()
                .map(|(name, value)| format!("{name}_{value}"))
                .collect::<Vec<_>>()
                .join("_"),
        )
    }
}

/// The validated intent of a run: what varies, or which existing video to measure.
#[derive(Clone, Debug, PartialEq)]
pub enum SweepSpec {
    Parameter {
        name: String,
        values: Vec<String>,
        held: Vec<(String, String)>,
    },
    Combinations(Vec<Combination>),
    Existing(PathBuf),
}

impl SweepSpec {
    /// Report column for the compared values, absent when nothing is swept.
    #[must_use]
    pub fn axis(&self) -> Option<String> {
        match self {
            Self::Parameter { name, .. } => Some(name.clone()),
            Self::Combinations(_) => Some(COMBINATION_AXIS.to_owned()),
            Self::Existing(_) => None,
        }
    }

    #[must_use]
    pub fn held(&self) -> &[(String, String)] {
        match self {
            Self::Parameter { held, .. } => held,
            Self::Combinations(_) | Self::Existing(_) => &[],
        }
    }

    /// Whether any job is encoded without its own AV1 speed.
    fn uses_default_av1_speed(&self) -> bool {
        match self {
            Self::Parameter { name, .. } => name != AV1_SPEED_FLAG,
            Self::Combinations(combinations) => combinations
                .iter()
                .any(|combination| !combination.pairs().iter().any(|(name, _)| name == AV1_SPEED_FLAG)),
            Self::Existing(_) => false,
        }
    }
}

/// One comparison: a transcode (unless measuring an existing video) followed by a metric run.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    pub label: String,
    pub directory: PathBuf,
    pub output_path: PathBuf,
    pub metric_log_path: PathBuf,
    pub reference_path: PathBuf,
    pub transcode: Option<TranscodeRequest>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    pub axis: Option<String>,
    pub held: Vec<(String, String)>,
    /// Every parameter that stays the same across jobs, for the report.
    pub fixed: Vec<(String, String)>,
    pub jobs: Vec<Job>,
}

fn is_url(path: &Path) -> bool {
    path.to_string_lossy().contains("://")
}

fn check_unique<'a>(kind: &str, items: impl IntoIterator<Item = &'a String>, errors: &mut Vec<String>) {
    let mut seen = HashSet::new();

    for item in items {
        if !seen.insert(item) {
            errors.push(format!("{kind} '{item}' was given more than once"));
        }
    }
}

fn legacy_spec(config: &Config, errors: &mut Vec<String>) -> Option<SweepSpec> {
    let crf = config.crf.iter().map(ToString::to_string).collect::<Vec<_>>();

    if crf.len() > 1 && config.preset.len() > 1 {
        errors.push(
            "More than one CRF value AND more than one preset specified. No suitable mode found."
                .to_owned(),
        );
        return None;
    }

    let presets_vary = config.preset.len() > 1 || crf.is_empty();

    if presets_vary {
        if !config.encoder.supports_presets() {
            errors.push(format!(
                "{} has no presets, compare --crf values or its cpu-used parameter instead",
                config.encoder
            ));
            return None;
        }

        check_unique("Preset", &config.preset, errors);

        Some(SweepSpec::Parameter {
            name: "preset".to_owned(),
            values: config.preset.clone(),
            held: vec![(
                "crf".to_owned(),
                crf.first().cloned().unwrap_or_else(|| DEFAULT_CRF.to_owned()),
            )],
        })
    } else {
        check_unique("CRF value", &crf, errors);

        let held = if config.encoder.supports_presets() {
            vec![(
                "preset".to_owned(),
                config
                    .preset
                    .first()
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_PRESET.to_owned()),
            )]
        } else {
            vec![]
        };

        Some(SweepSpec::Parameter {
            name: "crf".to_owned(),
            values: crf,
            held,
        })
    }
}

fn sweep_spec(config: &Config, errors: &mut Vec<String>) -> Option<SweepSpec> {
    let legacy = !config.crf.is_empty() || !config.preset.is_empty();
    let forms = [config.parameter.is_some(), !config.combinations.is_empty(), legacy]
        .into_iter()
        .filter(|given| *given)
        .count();

    if config.no_transcoding_mode {
        if forms > 0 {
            errors.push("Nothing can be compared in no transcoding mode, remove the sweep arguments".to_owned());
        }

        return match &config.transcoded_video {
            Some(path) if path.exists() => Some(SweepSpec::Existing(path.clone())),
            Some(path) => {
                errors.push(format!("Unable to find {}", path.display()));
                None
            }
            None => {
                errors.push("No transcoding mode requires --transcoded-video".to_owned());
                None
            }
        };
    }

    if forms > 1 {
        errors.push(
            "Ambiguous comparison: use only one of --parameter/--values, --combinations or --crf/--preset"
                .to_owned(),
        );
        return None;
    }

    if let Some(name) = &config.parameter {
        let name = name.trim_start_matches('-').to_owned();

        if config.values.is_empty() {
            errors.push(format!("No values given for parameter '{name}'"));
        }

        if name == "preset" && !config.encoder.supports_presets() {
            errors.push(format!(
                "{} has no presets, compare its cpu-used parameter instead",
                config.encoder
            ));
        }

        check_unique("Value", &config.values, errors);

        return Some(SweepSpec::Parameter {
            name,
            values: config.values.clone(),
            held: vec![],
        });
    }

    if !config.combinations.is_empty() {
        let mut combinations = vec![];

        for raw in &config.combinations {
            match Combination::parse(raw) {
                Ok(combination) => combinations.push(combination),
                Err(err) => errors.push(err),
            }
        }

        check_unique(
            "Combination",
            &combinations.iter().map(Combination::label).collect::<Vec<_>>(),
            errors,
        );

        return Some(SweepSpec::Combinations(combinations));
    }

    if legacy {
        return legacy_spec(config, errors);
    }

    errors.push("Nothing to compare: use --parameter/--values, --combinations, --crf or --preset".to_owned());
    None
}

/// Checks the whole configuration, reporting every problem at once.
pub fn validate(config: &Config) -> Result<SweepSpec, SweepError> {
    let mut errors = vec![];

    if !is_url(&config.source) && !config.source.exists() {
        errors.push(format!("Unable to find {}", config.source.display()));
    }

    if config.encode_length.is_some() && config.interval.is_some() {
        errors.push("--encode-length cannot be combined with --interval".to_owned());
    }

    if let Some(length) = config.encode_length {
        if length <= 0.0 || !length.is_finite() {
            errors.push(format!("--encode-length must be a positive number of seconds, got {length}"));
        }
    }

    if config.no_transcoding_mode && (config.encode_length.is_some() || config.interval.is_some()) {
        errors.push("--encode-length and --interval cannot be used in no transcoding mode".to_owned());
    }

    let spec = sweep_spec(config, &mut errors);

    match spec {
        Some(spec) if errors.is_empty() => Ok(spec),
        _ => Err(SweepError::Configuration(errors)),
    }
}

/// Expands a validated sweep into jobs, in the order the values were given.
#[must_use]
pub fn build(config: &Config, spec: &SweepSpec, reference: &Path, output_directory: &Path) -> Plan {
    let options: Vec<String> = config
        .encoder_options
        .as_deref()
        .map(|options| options.split_whitespace().map(ToOwned::to_owned).collect())
        .unwrap_or_default();

    let request = |output: &Path, mode: EncodingMode| TranscodeRequest {
        input: reference.to_path_buf(),
        output: output.to_path_buf(),
        encoder: config.encoder,
        mode,
        held: spec.held().to_vec(),
        options: Vec::clone(&options),
        filters: config.video_filters.clone(),
        av1_cpu_used: config.av1_cpu_used,
    };

    let job = |label: String, directory: PathBuf, output_path: PathBuf, mode: EncodingMode| Job {
        metric_log_path: directory.join(METRIC_LOG),
        reference_path: reference.to_path_buf(),
        transcode: Some(request(&output_path, mode)),
        label,
        directory,
        output_path,
    };

    let jobs = match spec {
        SweepSpec::Parameter { name, values, .. } => values
            .iter()
            .map(|value| {
                let directory = output_directory.join(sanitize(&format!("{name}_{value}")));
                let output_path = directory.join(format!("{}.mkv", sanitize(value)));

                job(
                    value.clone(),
                    directory,
                    output_path,
                    EncodingMode::for_parameter(config.encoder, name, value),
                )
            })
            .collect(),
        SweepSpec::Combinations(combinations) => combinations
            .iter()
            .map(|combination| {
                let directory = output_directory.join(combination.directory_name());
                let output_path = directory.join(format!("{}.mkv", combination.directory_name()));

                job(
                    combination.label(),
                    directory,
                    output_path,
                    EncodingMode::Combination(combination.pairs().to_vec()),
                )
            })
            .collect(),
        SweepSpec::Existing(path) => vec![Job {
            label: file_name(path),
            directory: output_directory.to_path_buf(),
            output_path: path.clone(),
            metric_log_path: output_directory.join(METRIC_LOG),
            reference_path: reference.to_path_buf(),
            transcode: None,
        }],
    };

    let mut fixed = spec.held().to_vec();

    if config.encoder == Encoder::LibaomAv1 && spec.uses_default_av1_speed() {
        fixed.push((AV1_SPEED_FLAG.to_owned(), config.av1_cpu_used.to_string()));
    }

    Plan {
        axis: spec.axis(),
        held: spec.held().to_vec(),
        fixed,
        jobs,
    }
}

impl Plan {
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.jobs.iter().map(|job| job.label.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rstest::rstest;
    use tempfile::NamedTempFile;

    fn config(source: &Path, args: &[&str]) -> Config {
        let source = source.to_string_lossy().to_string();

        Config::try_parse_from(
            ["video-quality-sweep", source.as_str()]
                .into_iter()
                .chain(args.iter().copied()),
        )
        .unwrap()
    }

    fn errors(result: Result<SweepSpec, SweepError>) -> Vec<String> {
        match result {
            Err(SweepError::Configuration(errors)) => errors,
            other => panic!("expected a configuration error, got {other:?}"),
        }
    }

    #[test]
    fn jobs_follow_the_given_order() {
        let source = NamedTempFile::new().unwrap();
        let config = config(source.path(), &["-p", "preset", "-v", "slow", "fast", "veryslow"]);

        let spec = validate(&config).unwrap();
        let plan = build(&config, &spec, source.path(), Path::new("out"));

        assert_eq!(plan.labels(), vec!["slow", "fast", "veryslow"]);
        assert_eq!(plan.axis.as_deref(), Some("preset"));
        assert_eq!(plan.jobs[0].output_path, PathBuf::from("out/preset_slow/slow.mkv"));
        assert_eq!(
            plan.jobs[0].metric_log_path,
            PathBuf::from("out/preset_slow/per_frame_metrics.json")
        );
        assert_eq!(
            plan.jobs[1].transcode.as_ref().map(|request| &request.mode),
            Some(&EncodingMode::NamedPreset {
                preset: "fast".to_owned()
            })
        );
    }

    #[test]
    fn rejects_ambiguous_sweeps() {
        let source = NamedTempFile::new().unwrap();
        let config = config(
            source.path(),
            &["-p", "crf", "-v", "20", "24", "-c", "preset slow crf 20,preset fast crf 24"],
        );

        let errors = errors(validate(&config));

        assert!(errors.iter().any(|error| error.starts_with("Ambiguous comparison")));
    }

    #[test]
    fn rejects_two_legacy_axes() {
        let source = NamedTempFile::new().unwrap();
        let config = config(source.path(), &["--crf", "18", "23", "--preset", "slow", "fast"]);

        assert_eq!(
            errors(validate(&config)),
            vec!["More than one CRF value AND more than one preset specified. No suitable mode found."]
        );
    }

    #[test]
    fn batches_every_error() {
        let config = config(
            Path::new("/definitely/missing.mkv"),
            &["-c", "preset slow crf,preset", "-t", "10", "--interval", "30"],
        );

        let errors = errors(validate(&config));

        assert_eq!(errors.len(), 4);
        assert!(errors[0].starts_with("Unable to find"));
        assert!(errors[1].contains("--interval"));
        assert!(errors[2].contains("has 3 words"));
        assert!(errors[3].contains("has 1 words"));
    }

    #[rstest]
    #[case(&["-p", "crf", "-v", "20", "20"], "Value '20' was given more than once")]
    #[case(&["-e", "libaom-av1", "-p", "preset", "-v", "slow"], "libaom-av1 has no presets, compare its cpu-used parameter instead")]
    #[case(&["-e", "libaom-av1", "--preset", "slow", "fast"], "libaom-av1 has no presets, compare --crf values or its cpu-used parameter instead")]
    #[case(&["-t", "0"], "--encode-length must be a positive number of seconds, got 0")]
    fn reports_invalid_sweeps(#[case] args: &[&str], #[case] expected: &str) {
        let source = NamedTempFile::new().unwrap();
        let config = config(source.path(), args);

        assert!(errors(validate(&config)).iter().any(|error| error == expected));
    }

    #[test]
    fn single_value_is_a_single_job() {
        let source = NamedTempFile::new().unwrap();
        let config = config(source.path(), &["-p", "tune", "-v", "film"]);

        let spec = validate(&config).unwrap();
        let plan = build(&config, &spec, source.path(), Path::new("out"));

        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(
            plan.jobs[0].transcode.as_ref().map(|request| &request.mode),
            Some(&EncodingMode::Parameter {
                name: "tune".to_owned(),
                value: "film".to_owned()
            })
        );
    }

    #[test]
    fn combinations_become_flag_pairs() {
        let source = NamedTempFile::new().unwrap();
        let config = config(source.path(), &["-c", "preset veryslow crf 18,preset slower crf 16"]);

        let spec = validate(&config).unwrap();
        let plan = build(&config, &spec, source.path(), Path::new("out"));

        assert_eq!(plan.axis.as_deref(), Some("Combination"));
        assert_eq!(plan.labels(), vec!["-preset veryslow -crf 18", "-preset slower -crf 16"]);
        assert_eq!(
            plan.jobs[0].output_path,
            PathBuf::from("out/preset_veryslow_crf_18/preset_veryslow_crf_18.mkv")
        );
    }

    #[test]
    fn legacy_crf_sweep_holds_the_preset() {
        let source = NamedTempFile::new().unwrap();
        let config = config(source.path(), &["--crf", "18", "23", "28", "--preset", "slow"]);

        let spec = validate(&config).unwrap();
        let plan = build(&config, &spec, source.path(), Path::new("out"));

        assert_eq!(plan.axis.as_deref(), Some("crf"));
        assert_eq!(plan.held, vec![("preset".to_owned(), "slow".to_owned())]);
        assert_eq!(plan.labels(), vec!["18", "23", "28"]);
        assert!(plan
            .jobs
            .iter()
            .all(|job| job.transcode.as_ref().is_some_and(|request| request.held == plan.held)));
    }

    #[test]
    fn legacy_preset_sweep_holds_the_default_crf() {
        let source = NamedTempFile::new().unwrap();
        let config = config(source.path(), &["--preset", "fast", "slow"]);

        let spec = validate(&config).unwrap();

        assert_eq!(
            spec,
            SweepSpec::Parameter {
                name: "preset".to_owned(),
                values: vec!["fast".to_owned(), "slow".to_owned()],
                held: vec![("crf".to_owned(), "23".to_owned())],
            }
        );
    }

    #[rstest]
    #[case(&["-e", "libaom-av1", "--crf", "30", "35"], vec![("cpu-used", "5")])]
    #[case(&["-e", "libaom-av1", "--av1-cpu-used", "3", "-p", "crf", "-v", "30"], vec![("cpu-used", "3")])]
    #[case(&["-e", "libaom-av1", "-p", "cpu-used", "-v", "4", "6"], vec![])]
    #[case(&["-e", "libaom-av1", "-c", "cpu-used 4 crf 30,cpu-used 6 crf 30"], vec![])]
    #[case(&["-e", "libaom-av1", "-c", "cpu-used 4 crf 30,crf 35"], vec![("cpu-used", "5")])]
    #[case(&["--crf", "18", "23"], vec![("preset", "medium")])]
    fn fixed_parameters_include_the_default_av1_speed(
        #[case] args: &[&str],
        #[case] expected: Vec<(&str, &str)>,
    ) {
        let source = NamedTempFile::new().unwrap();
        let config = config(source.path(), args);

        let spec = validate(&config).unwrap();
        let plan = build(&config, &spec, source.path(), Path::new("out"));

        let expected = expected
            .into_iter()
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .collect::<Vec<_>>();
        assert_eq!(plan.fixed, expected);
    }

    #[test]
    fn no_transcoding_mode_measures_the_given_video() {
        let source = NamedTempFile::new().unwrap();
        let transcoded = NamedTempFile::new().unwrap();
        let transcoded_path = transcoded.path().to_string_lossy().to_string();
        let config = config(
            source.path(),
            &["--no-transcoding-mode", "--transcoded-video", transcoded_path.as_str()],
        );

        let spec = validate(&config).unwrap();
        let plan = build(&config, &spec, source.path(), Path::new("out"));

        assert_eq!(plan.axis, None);
        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].output_path, transcoded.path());
        assert_eq!(plan.jobs[0].transcode, None);
    }
}
