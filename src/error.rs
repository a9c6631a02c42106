use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the provider client.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("transport failure for request {request_id}: {source}")]
    Transport {
        request_id: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request {request_id} timed out after {seconds}s")]
    Timeout { request_id: String, seconds: u64 },

    #[error("provider rejected the API token (status {status})")]
    Auth { status: u16 },

    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("rate limited on {url} after {attempts} attempts")]
    RateLimited { url: String, attempts: u32 },

    #[error("malformed payload from {url}: {detail}")]
    Malformed { url: String, detail: String },

    #[error("no journey between {from} and {to}")]
    NoJourney { from: String, to: String },

    #[error("call cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Auth failures abort the whole pipeline rather than being recorded
    /// as per-record gaps.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProviderError::Auth { .. } | ProviderError::Cancelled)
    }
}

/// Failures surfaced by the build pipeline orchestrator.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("provider error in stage {stage}: {source}")]
    Provider {
        stage: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("stage {stage}: {malformed} of {seen} records malformed (over the 1% ceiling)")]
    MalformedRateExceeded {
        stage: &'static str,
        malformed: usize,
        seen: usize,
    },

    #[error("validation gate failed with {failures} finding(s); report at {report_path}")]
    ValidationFailed {
        failures: usize,
        report_path: PathBuf,
    },

    #[error("build cancelled before stage {stage} completed")]
    Cancelled { stage: &'static str },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact {path} is unusable: {detail}")]
    Artifact { path: PathBuf, detail: String },
}

impl BuildError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }
}
