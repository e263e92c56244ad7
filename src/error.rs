use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Failures the sweep distinguishes when deciding whether to continue.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Invalid configuration:\n  {}", .0.join("\n  "))]
    Configuration(Vec<String>),

    #[error("{tool} failed for {label} ({status}):\n{output}")]
    ExternalTool {
        label: String,
        tool: &'static str,
        status: ExitStatus,
        output: String,
    },

    #[error("Unusable artifact {path:?} for {label}: {reason}")]
    Artifact {
        label: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Unable to create overview video: {0}")]
    Overview(String),

    #[error("Interrupted while processing {label}")]
    Interrupted { label: String },
}

impl SweepError {
    /// Whether this failure belongs to a single job rather than the whole run.
    #[must_use]
    pub const fn is_job_failure(&self) -> bool {
        matches!(self, Self::ExternalTool { .. } | Self::Artifact { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_list_every_message() {
        let error = SweepError::Configuration(vec!["first".to_owned(), "second".to_owned()]);

        assert_eq!(error.to_string(), "Invalid configuration:\n  first\n  second");
    }

    #[test]
    fn only_job_errors_are_job_failures() {
        let artifact = SweepError::Artifact {
            label: "fast".to_owned(),
            path: PathBuf::from("fast.mkv"),
            reason: "missing".to_owned(),
        };

        assert!(artifact.is_job_failure());
        assert!(!SweepError::Overview("too short".to_owned()).is_job_failure());
        assert!(!SweepError::Interrupted { label: "fast".to_owned() }.is_job_failure());
    }
}
