use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Classification of a failed calculation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input rejected before dispatch.
    Validation,
    /// Engine did not finish within the wall-clock limit.
    Timeout,
    /// Engine exited non-zero or reported an error document.
    EngineFailure,
    /// Engine exited cleanly but produced nothing.
    EmptyOutput,
    /// Engine output could not be read as a calculation result.
    MalformedResponse,
    /// I/O or launch fault not covered above.
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::EngineFailure => "engine_failure",
            ErrorKind::EmptyOutput => "empty_output",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Unexpected => "unexpected",
        }
    }

    /// Whether a fresh attempt may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Unexpected)
    }

    /// Short category shown to the user ahead of the message.
    pub fn category(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Invalid input",
            ErrorKind::Timeout => "Calculation timed out",
            ErrorKind::EngineFailure => "Calculation engine error",
            ErrorKind::EmptyOutput | ErrorKind::MalformedResponse => "Unreadable engine response",
            ErrorKind::Unexpected => "Unexpected error",
        }
    }

    /// Next step the user can take.
    pub fn guidance(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Check input consistency and correct the flagged fields.",
            ErrorKind::Timeout => "Try again; if it keeps happening, raise the timeout or check engine load.",
            ErrorKind::EngineFailure => "Check input consistency, then verify the engine installation.",
            ErrorKind::EmptyOutput | ErrorKind::MalformedResponse => {
                "The engine broke its output contract; verify the engine version."
            }
            ErrorKind::Unexpected => "Verify the engine installation and interpreter path.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognized cause of an engine crash, read from its error stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineFault {
    MissingDependency,
    InvalidInput,
    MissingFile,
    Database,
}

impl EngineFault {
    /// First known marker found in `stderr`, checked in a fixed order.
    pub fn classify(stderr: &str) -> Option<Self> {
        const MARKERS: [(&str, EngineFault); 4] = [
            ("ModuleNotFoundError", EngineFault::MissingDependency),
            ("ValidationError", EngineFault::InvalidInput),
            ("FileNotFoundError", EngineFault::MissingFile),
            ("sqlite3.OperationalError", EngineFault::Database),
        ];
        MARKERS
            .iter()
            .find(|(marker, _)| stderr.contains(marker))
            .map(|(_, fault)| *fault)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineFault::MissingDependency => "missing_dependency",
            EngineFault::InvalidInput => "invalid_input",
            EngineFault::MissingFile => "missing_file",
            EngineFault::Database => "database",
        }
    }

    pub fn guidance(&self) -> &'static str {
        match self {
            EngineFault::MissingDependency => {
                "A module the engine needs is not installed; check the engine's dependencies."
            }
            EngineFault::InvalidInput => "The engine rejected the inputs; check your parameters.",
            EngineFault::MissingFile => "A file the engine needs is missing; check the installation.",
            EngineFault::Database => "The engine's database failed and may be corrupted.",
        }
    }
}

impl fmt::Display for EngineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error-variant of a calculation: a tag, a user-facing message and
/// technical details meant for an expandable section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CalculationError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<EngineFault>,
}

impl CalculationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: details.into(),
            fault: None,
        }
    }

    pub fn with_fault(mut self, fault: Option<EngineFault>) -> Self {
        self.fault = fault;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Guidance for the recognized fault, else for the kind.
    pub fn guidance(&self) -> &'static str {
        self.fault
            .map_or_else(|| self.kind.guidance(), |fault| fault.guidance())
    }

    /// Category, message and guidance on separate lines; details are left
    /// out so they can be shown on demand.
    pub fn user_summary(&self) -> String {
        format!("{}\n{}\n{}", self.kind.category(), self.message, self.guidance())
    }
}

pub type CalculationOutcome = Result<crate::model::CalculationResult, CalculationError>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid session document {}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration from {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid {field}: {value} ({reason})")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}
