use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading parameters, fitting surrogates or writing results.
#[derive(Debug, Error)]
pub enum InterfaceError {
    /// The parameter (or results) file is malformed.
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A structured results document has the wrong shape.
    #[error("results document: {0}")]
    Malformed(String),

    /// A requested field was not supplied before the results were written.
    #[error("response '{response}' is missing requested {field}")]
    IncompleteResults { response: String, field: String },

    /// The normal equations could not be solved.
    #[error("singular normal equations: {0}")]
    SingularMatrix(String),

    /// Label metadata or data shape disagrees with the model dimensions.
    #[error("{what}: expected {expected}, found {found}")]
    LabelMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("surrogate labels are already set")]
    LabelsAlreadySet,

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),
}

impl InterfaceError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    pub(crate) fn incomplete(response: &str, field: impl Into<String>) -> Self {
        Self::IncompleteResults {
            response: response.to_string(),
            field: field.into(),
        }
    }

    pub(crate) fn label_mismatch(what: impl Into<String>, expected: usize, found: usize) -> Self {
        Self::LabelMismatch {
            what: what.into(),
            expected,
            found,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Taxonomy name reported on stderr by the driver.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Parse { .. } | Self::Malformed(_) | Self::Json(_) => "ParseError",
            Self::IncompleteResults { .. } => "IncompleteResultsError",
            Self::SingularMatrix(_) => "SingularMatrixError",
            Self::LabelMismatch { .. } | Self::LabelsAlreadySet => "LabelMismatchError",
            Self::Io { .. } => "IoError",
            Self::Config(_) => "ConfigError",
        }
    }
}

pub type Result<T> = std::result::Result<T, InterfaceError>;
