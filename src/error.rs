use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the federated learning engine
#[derive(Error, Debug)]
pub enum FedError {
    #[error("IO error: {source}")]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("Invalid environment: {message}")]
    InvalidEnvironment { message: String },

    #[error("Action space mismatch: expected {expected} actions, found {found}")]
    ActionSpaceMismatch { expected: usize, found: usize },

    #[error("Aggregation requires at least one table")]
    EmptyAggregation,

    #[error("Weight count mismatch: {tables} tables but {weights} weights")]
    WeightMismatch { tables: usize, weights: usize },

    #[error("Operation '{operation}' is not available in {mode} mode")]
    InvalidMode {
        operation: String,
        mode: String,
    },

    #[error("Evaluation error: {message}")]
    Evaluation { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Parse error: {message}")]
    Parse { message: String },
}

impl FedError {
    /// Create a new IO error with path context
    pub fn io_error(err: std::io::Error, path: Option<impl Into<PathBuf>>) -> Self {
        Self::Io {
            source: err,
            path: path.map(|p| p.into()),
        }
    }

    /// Create a new configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new invalid environment error
    pub fn invalid_environment(message: impl Into<String>) -> Self {
        Self::InvalidEnvironment {
            message: message.into(),
        }
    }

    /// Create a new invalid mode error
    pub fn invalid_mode(operation: impl Into<String>, mode: impl fmt::Display) -> Self {
        Self::InvalidMode {
            operation: operation.into(),
            mode: mode.to_string(),
        }
    }

    /// Create a new evaluation error
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a new parse error
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Whether the error was caused by a bad configuration or environment,
    /// i.e. the engine must not be started with the same inputs
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FedError::Configuration { .. } | FedError::InvalidEnvironment { .. }
        )
    }
}

impl From<std::io::Error> for FedError {
    fn from(error: std::io::Error) -> Self {
        FedError::io_error(error, None::<PathBuf>)
    }
}

impl From<serde_json::Error> for FedError {
    fn from(error: serde_json::Error) -> Self {
        FedError::parse_error(error.to_string())
    }
}

impl From<serde_yaml::Error> for FedError {
    fn from(error: serde_yaml::Error) -> Self {
        FedError::parse_error(error.to_string())
    }
}

impl From<toml::de::Error> for FedError {
    fn from(error: toml::de::Error) -> Self {
        FedError::parse_error(error.to_string())
    }
}

impl From<toml::ser::Error> for FedError {
    fn from(error: toml::ser::Error) -> Self {
        FedError::serialization(error.to_string())
    }
}

/// Result type alias using FedError
pub type FedResult<T> = Result<T, FedError>;

/// Extension trait for converting errors to FedError
pub trait ErrorExt<T> {
    /// Convert to FedResult with file path context
    fn with_path(self, path: impl Into<PathBuf>) -> FedResult<T>;
}

impl<T, E: fmt::Display> ErrorExt<T> for Result<T, E> {
    fn with_path(self, path: impl Into<PathBuf>) -> FedResult<T> {
        let path = path.into();
        self.map_err(|e| FedError::persistence(format!("{} (path: {})", e, path.display())))
    }
}

/// Contextual error mapping function
pub fn map_io_err<P: Into<PathBuf>>(path: P) -> impl FnOnce(std::io::Error) -> FedError {
    let path = path.into();
    move |err| FedError::io_error(err, Some(path))
}
