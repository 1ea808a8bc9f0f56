//! Error handling module for the installer
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Every variant carries the failure class it belongs to, so the pipeline can
//! report *what kind* of thing went wrong without inspecting message strings.

use crate::install_state::{InstallStage, InstallTransitionError};
use thiserror::Error;

/// Failure classes of the installation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Partitioning, formatting or encryption setup. Disk state is undefined afterwards.
    Destructive,
    /// Mounting the target tree failed.
    Mount,
    /// The bulk package installation into the target failed.
    PackageInstall,
    /// Writing configuration into the target failed.
    Configuration,
    /// Registering or installing the boot path failed.
    BootRegistration,
    /// Host environment problems (tool missing, I/O, interruption).
    Environment,
}

/// Main error type for the installer core
#[derive(Error, Debug)]
pub enum InstallError {
    /// IO errors (file operations on the target tree)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A tool could not be started at all
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A tool ran and exited non-zero
    #[error("{context} failed (exit code {code}): {stderr}")]
    CommandFailed {
        context: String,
        code: i32,
        stderr: String,
    },

    /// Configuration errors (missing or inconsistent values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Partition table creation errors
    #[error("Partitioning error: {0}")]
    Partition(String),

    /// Filesystem creation errors
    #[error("Format error: {0}")]
    Format(String),

    /// LUKS container setup errors
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Mount errors
    #[error("Mount error: {0}")]
    Mount(String),

    /// Bulk package installation errors
    #[error("Package installation error: {0}")]
    PackageInstall(String),

    /// Bootloader or firmware boot entry errors
    #[error("Boot setup error: {0}")]
    BootRegistration(String),

    /// The operator asked the installer to stop between steps
    #[error("Installation interrupted before {0}")]
    Interrupted(String),

    /// The pipeline attempted an out-of-order stage transition
    #[error("Install state error: {0}")]
    InstallTransition(#[from] InstallTransitionError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for installer operations
pub type Result<T> = std::result::Result<T, InstallError>;

// Convenient error constructors
impl InstallError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a partitioning error
    pub fn partition(msg: impl Into<String>) -> Self {
        Self::Partition(msg.into())
    }

    /// Create a format error
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Create an encryption error
    pub fn encryption(msg: impl Into<String>) -> Self {
        Self::Encryption(msg.into())
    }

    /// Create a mount error
    pub fn mount(msg: impl Into<String>) -> Self {
        Self::Mount(msg.into())
    }

    /// Create a package installation error
    pub fn package_install(msg: impl Into<String>) -> Self {
        Self::PackageInstall(msg.into())
    }

    /// Create a boot setup error
    pub fn boot(msg: impl Into<String>) -> Self {
        Self::BootRegistration(msg.into())
    }

    /// Failure class of this error
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Partition(_) | Self::Format(_) | Self::Encryption(_) => FailureKind::Destructive,
            Self::Mount(_) => FailureKind::Mount,
            Self::PackageInstall(_) => FailureKind::PackageInstall,
            Self::BootRegistration(_) => FailureKind::BootRegistration,
            Self::Config(_) | Self::Json(_) | Self::CommandFailed { .. } => {
                FailureKind::Configuration
            }
            Self::Io(_) | Self::Spawn { .. } | Self::Interrupted(_) | Self::InstallTransition(_) => {
                FailureKind::Environment
            }
        }
    }

    /// Returns true if the disk may have been left in an undefined state
    pub fn is_destructive(&self) -> bool {
        self.kind() == FailureKind::Destructive
    }
}

/// The single terminal failure of a pipeline run.
///
/// Names the stage that failed; `Display` is the message surfaced to the operator.
#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct StepFailure {
    pub stage: InstallStage,
    #[source]
    pub source: InstallError,
    /// Stages that finished before `stage` failed
    pub completed: Vec<InstallStage>,
}

impl StepFailure {
    pub fn new(stage: InstallStage, source: InstallError) -> Self {
        Self {
            stage,
            source,
            completed: Vec::new(),
        }
    }

    pub fn with_completed(mut self, completed: Vec<InstallStage>) -> Self {
        self.completed = completed;
        self
    }

    /// Failure class of the underlying error
    pub fn kind(&self) -> FailureKind {
        self.source.kind()
    }
}
