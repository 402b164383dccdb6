use thiserror::Error;

/// Top-level error type for the keel kernel.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("plugin already registered: {0}")]
    DuplicatePlugin(String),

    #[error("plugin '{plugin}' depends on '{dependency}', which is not available")]
    MissingDependency { plugin: String, dependency: String },

    #[error("circular plugin dependency: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("plugin '{plugin}' failed to install: {source}")]
    PluginInstallFailed {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid state path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("middleware '{middleware}' failed: {source}")]
    MiddlewareExecutionFailed {
        middleware: String,
        #[source]
        source: anyhow::Error,
    },

    /// Captured from an event handler. Reported, never propagated out of `emit`.
    #[error("listener for '{event}' failed: {message}")]
    ListenerError { event: String, message: String },

    #[error("engine is {actual}, expected {expected}")]
    InvalidPhase { expected: String, actual: String },

    #[error("state loader error: {0}")]
    Loader(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KernelError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable tag, used as the `kind` field of error events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicatePlugin(_) => "duplicate_plugin",
            Self::MissingDependency { .. } => "missing_dependency",
            Self::CircularDependency { .. } => "circular_dependency",
            Self::PluginInstallFailed { .. } => "plugin_install_failed",
            Self::InvalidPath { .. } => "invalid_path",
            Self::MiddlewareExecutionFailed { .. } => "middleware_execution_failed",
            Self::ListenerError { .. } => "listener_error",
            Self::InvalidPhase { .. } => "invalid_phase",
            Self::Loader(_) => "loader",
            Self::Config(_) => "config",
            Self::Other(_) => "other",
        }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
