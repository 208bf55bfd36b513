use thiserror::Error;

/// The grammar configuration could not be turned into a usable vocabulary.
#[derive(Error, Debug)]
pub enum GrammarError {
    #[error("table {0} is missing from the grammar configuration")]
    MissingTable(&'static str),
    #[error("{0} is not a declared mode")]
    UnknownMode(String),
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("no noun pattern with a 'val' capture for mode {0}")]
    MissingValCapture(String),
    #[error("cannot read grammar configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse grammar configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// An inbound line that did not parse: wrong call sign, or a phrase without
/// any known command verb. Reported locally and turned into a sentinel
/// record, never propagated to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CommunicationError(pub String);
