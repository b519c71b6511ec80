use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::rate_limit::RateLimited;

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Failure of a single store operation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("database error during {op}")]
    Database {
        op: &'static str,
        #[source]
        source: DatabaseFailure,
    },
}

/// Underlying cause of a [`StoreError::Database`]; a missed deadline is
/// reported the same way as a driver failure.
#[derive(Error, Debug)]
pub enum DatabaseFailure {
    #[error(transparent)]
    Driver(#[from] sqlx::Error),
    #[error("no response within {0:?}")]
    Deadline(Duration),
}

impl StoreError {
    #[cfg(test)]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    pub(crate) fn database(op: &'static str, source: sqlx::Error) -> Self {
        match source {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            _ => StoreError::Database {
                op,
                source: source.into(),
            },
        }
    }

    pub(crate) fn deadline(op: &'static str, limit: Duration) -> Self {
        StoreError::Database {
            op,
            source: DatabaseFailure::Deadline(limit),
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("paste is not editable")]
    NotEditable,
    #[error("rate limited, retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },
    #[error("store error")]
    Store {
        #[source]
        source: StoreError,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::NotEditable => StatusCode::FORBIDDEN,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Store { source } => {
                tracing::error!("store failure: {source}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut response = (status_code, format!("{self}")).into_response();
        if let ApiError::RateLimited { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response
    }
}

impl From<StoreError> for ApiError {
    fn from(source: StoreError) -> Self {
        match source {
            StoreError::NotFound => ApiError::NotFound,
            _ => ApiError::Store { source },
        }
    }
}

impl From<RateLimited> for ApiError {
    fn from(limited: RateLimited) -> Self {
        ApiError::RateLimited {
            retry_after: limited.retry_after,
        }
    }
}
