// Error taxonomy for the query pipeline
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("data processing operator is invalid: {0}")]
    InvalidOperator(String),

    #[error("method not found: {0}")]
    UnknownFunction(String),

    #[error("invalid parameter '{param}' for function {func}")]
    InvalidParameter { func: String, param: String },

    #[error("invalid alias pattern: {0}")]
    InvalidAliasPattern(#[from] regex::Error),

    #[error("no data returned for {0}")]
    EmptyResponse(String),

    #[error("archiver request failed: {0}")]
    Backend(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
