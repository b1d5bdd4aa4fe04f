use std::time::Duration;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    /// A conditional update found the entity changed since it was read.
    #[error("Write conflict on {entity} {id}")]
    Conflict { entity: &'static str, id: String },

    #[error("{entity} {id} not found")]
    Missing { entity: &'static str, id: String },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<mongodb::error::Error> for StoreError {
    fn from(e: mongodb::error::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResponseError for EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Store(e) if e.is_conflict() => StatusCode::CONFLICT,
            EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }))
    }
}

/// Failures of a matcher call. Never surfaced to callers; the engine falls
/// back to the first task of the pool.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Matcher timed out after {0:?}")]
    Timeout(Duration),

    #[error("Matcher oracle error: {0}")]
    Oracle(String),
}

impl From<reqwest::Error> for MatchError {
    fn from(e: reqwest::Error) -> Self {
        MatchError::Oracle(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}
