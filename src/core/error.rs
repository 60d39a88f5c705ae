use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage that produced a terminal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Resolve,
    License,
    Provision,
    Plan,
    Supervise,
    Registry,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Resolve => write!(f, "resolve"),
            PipelineStage::License => write!(f, "license"),
            PipelineStage::Provision => write!(f, "provision"),
            PipelineStage::Plan => write!(f, "plan"),
            PipelineStage::Supervise => write!(f, "supervise"),
            PipelineStage::Registry => write!(f, "registry"),
        }
    }
}

/// Central error type for the launcher.
/// Every module returns `Result<T, LauncherError>`.
#[derive(Debug, Error)]
pub enum LauncherError {
    // ── Pipeline stages ─────────────────────────────────
    #[error("Unknown variant: {0}")]
    UnknownVariant(String),

    #[error("Ambiguous variant '{requested}': matches {candidates:?}")]
    AmbiguousVariant {
        requested: String,
        candidates: Vec<String>,
    },

    #[error("Duplicate mod in mod set: {0}")]
    DuplicateMod(String),

    #[error("License not accepted ({path:?}): {reason}")]
    LicenseNotAccepted { path: PathBuf, reason: String },

    #[error("Provisioning failed: {reason}")]
    ProvisionFailed { reason: String },

    #[error("Invalid override {field}={value:?}: {reason}")]
    InvalidOverride {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Launch failed: {0}")]
    LaunchFailed(String),

    #[error("Supervisor gave up after {restarts} restarts (last: {last})")]
    SupervisorExhausted { restarts: u32, last: String },

    #[error("Owner {owner} already has {limit} instances")]
    InstanceLimitReached { owner: String, limit: usize },

    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    // ── Integrity ───────────────────────────────────────
    #[error("SHA-1 mismatch for {path:?}: expected {expected}, got {actual}")]
    Sha1Mismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("SHA-256 mismatch for {path:?}: expected {expected}, got {actual}")]
    Sha256Mismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Archive ─────────────────────────────────────────
    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ── Instance ────────────────────────────────────────
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type LauncherResult<T> = Result<T, LauncherError>;

impl From<std::io::Error> for LauncherError {
    fn from(source: std::io::Error) -> Self {
        LauncherError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

impl LauncherError {
    /// Stage this error belongs to, if it is one of the pipeline's terminal errors.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            LauncherError::UnknownVariant(_)
            | LauncherError::AmbiguousVariant { .. }
            | LauncherError::DuplicateMod(_) => Some(PipelineStage::Resolve),
            LauncherError::LicenseNotAccepted { .. } => Some(PipelineStage::License),
            LauncherError::ProvisionFailed { .. } => Some(PipelineStage::Provision),
            LauncherError::InvalidOverride { .. } => Some(PipelineStage::Plan),
            LauncherError::LaunchFailed(_) | LauncherError::SupervisorExhausted { .. } => {
                Some(PipelineStage::Supervise)
            }
            LauncherError::InstanceLimitReached { .. } => Some(PipelineStage::Registry),
            _ => None,
        }
    }

    /// Process exit code reported to external monitoring.
    pub fn exit_code(&self) -> i32 {
        match self {
            LauncherError::UnknownVariant(_) => 10,
            LauncherError::AmbiguousVariant { .. } => 11,
            LauncherError::DuplicateMod(_) => 12,
            LauncherError::LicenseNotAccepted { .. } => 20,
            LauncherError::ProvisionFailed { .. } => 30,
            LauncherError::InvalidOverride { .. } => 40,
            LauncherError::LaunchFailed(_) => 50,
            LauncherError::SupervisorExhausted { .. } => 51,
            LauncherError::InstanceLimitReached { .. } => 60,
            _ => 1,
        }
    }

    /// Fold infrastructure errors raised while staging into `ProvisionFailed`.
    /// Errors that already carry a stage pass through untouched.
    pub fn into_provision_failure(self) -> LauncherError {
        if self.stage().is_some() {
            return self;
        }
        LauncherError::ProvisionFailed {
            reason: self.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LauncherError::Io {
            path: path.into(),
            source,
        }
    }
}
