use thiserror::Error;

pub type Result<T, E = EncryptError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EncryptError {
    #[error("invalid encrypt rule configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown encrypt algorithm type `{0}`")]
    UnknownAlgorithm(String),

    #[error("encrypt algorithm `{algorithm}` requires property `{property}`")]
    MissingAlgorithmProperty { algorithm: String, property: String },

    #[error("encrypt algorithm `{algorithm}` failed: {message}")]
    Algorithm { algorithm: String, message: String },

    #[error("encrypt algorithm `{0}` is one-way and cannot decrypt")]
    DecryptUnsupported(String),

    #[error("failed to parse SQL: {0}")]
    Parse(String),

    #[error("no value bound for parameter {0}")]
    MissingParameter(usize),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EncryptError {
    pub(crate) fn algorithm(algorithm: &str, message: impl std::fmt::Display) -> Self {
        Self::Algorithm {
            algorithm: algorithm.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<sqlparser::tokenizer::TokenizerError> for EncryptError {
    fn from(e: sqlparser::tokenizer::TokenizerError) -> Self {
        Self::Parse(e.to_string())
    }
}
