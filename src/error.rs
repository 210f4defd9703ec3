use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// The phase of a run a failure occurred in, surfaced alongside the error kind
/// on `user.log`/stderr (§7 "User surface").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Plan,
    Block,
    Reslice,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Plan => "plan",
            Phase::Block => "block",
            Phase::Reslice => "reslice",
        };
        write!(f, "{s}")
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error in {identifier}: {message}")]
    Configuration { identifier: String, message: String },

    #[error("capability error in {identifier}: {message}")]
    Capability { identifier: String, message: String },

    #[error("plan error in section {section}: {message}")]
    Plan { section: String, message: String },

    #[error("data error in {identifier} (phase {phase}): {message}")]
    Data {
        identifier: String,
        phase: Phase,
        message: String,
    },

    #[error("io error in {identifier}: {source}")]
    Io {
        identifier: String,
        #[source]
        source: std::io::Error,
    },

    #[error("hdf5 error in {identifier}: {message}")]
    Hdf5 { identifier: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn configuration(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            identifier: identifier.into(),
            message: message.into(),
        }
    }

    pub fn capability(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capability {
            identifier: identifier.into(),
            message: message.into(),
        }
    }

    pub fn plan(section: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plan {
            section: section.into(),
            message: message.into(),
        }
    }

    pub fn data(identifier: impl Into<String>, phase: Phase, message: impl Into<String>) -> Self {
        Self::Data {
            identifier: identifier.into(),
            phase,
            message: message.into(),
        }
    }

    pub fn io(identifier: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            identifier: identifier.into(),
            source,
        }
    }

    pub fn hdf5(identifier: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Hdf5 {
            identifier: identifier.into(),
            message: message.to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Classification used only for the uniform user.log/stderr rendering of §7 -
    /// this engine never retries, so there is no transient/permanent distinction.
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Configuration { .. } => ErrorCategory::Configuration,
            EngineError::Capability { .. } => ErrorCategory::Capability,
            EngineError::Plan { .. } => ErrorCategory::Plan,
            EngineError::Data { .. } => ErrorCategory::Data,
            EngineError::Io { .. } | EngineError::Hdf5 { .. } => ErrorCategory::Io,
            EngineError::Internal(_) | EngineError::Other(_) => ErrorCategory::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Capability,
    Plan,
    Data,
    Io,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Capability => "capability",
            ErrorCategory::Plan => "plan",
            ErrorCategory::Data => "data",
            ErrorCategory::Io => "io",
            ErrorCategory::Internal => "internal",
        }
    }

    /// Whether a failure of this kind can occur before any block has run,
    /// i.e. whether the run aborted without touching the data (§7 Propagation).
    pub fn is_plan_time(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Configuration | ErrorCategory::Capability | ErrorCategory::Plan
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
