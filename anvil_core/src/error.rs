use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("entity `{0}` not found")]
    NotFound(String),
    #[error("failed in IO: {0}")]
    IO(#[from] std::io::Error),
    #[error("argument provided is error: {0}")]
    Argument(String),
    #[error("data error: {0}")]
    Data(String),
    #[error("malformed yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("environment error: {0}")]
    Environment(String),
    #[error("no compiler registered for language `{0}`")]
    UnknownLanguage(String),
    #[error("judging cancelled")]
    Cancelled,
}

impl Error {
    /// Short, user-facing reason. Never carries raw OS error text.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "missing judging resource",
            Error::IO(_) => "judging infrastructure io failure",
            Error::Argument(_) => "invalid judging argument",
            Error::Data(_) => "invalid problem data",
            Error::Yaml(_) => "invalid configuration",
            Error::Environment(_) => "judging environment unavailable",
            Error::UnknownLanguage(_) => "unsupported language",
            Error::Cancelled => "judging cancelled",
        }
    }
}
