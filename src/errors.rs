//! The crate's single public error taxonomy.
//!
//! Internal plumbing propagates `anyhow::Error`; at each component boundary (chain client,
//! store, indexer, query engine) the error is classified into one of these variants as soon
//! as its kind is decidable. The HTTP adapter is the only place that maps a variant to a
//! status code.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("chain unavailable: {0}")]
    Unavailable(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ExplorerError>;

impl ExplorerError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::DecodeError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// `Timeout` is intentionally not mapped here for address/extrinsic searches —
    /// those surface a partial 200 body instead; this mapping is only used for
    /// single-resource lookups where a timeout is a 504.
    pub fn status_code(&self) -> warp::http::StatusCode {
        use warp::http::StatusCode;
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DecodeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::http::StatusCode;

    #[test]
    fn maps_variants_to_status_codes() {
        assert_eq!(
            ExplorerError::bad_request("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ExplorerError::not_found("x").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ExplorerError::unavailable("x").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ExplorerError::timeout("x").status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ExplorerError::Internal(anyhow::anyhow!("x")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
