use actix_web::{error::BlockingError, http::StatusCode, HttpResponse, ResponseError};
use common::req::ValidationError;
use thiserror::Error;

use crate::db::StorageError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Request that could not be decoded at all (bad JSON, wrong types, missing query).
    #[error("{message}")]
    Malformed {
        field: &'static str,
        message: String,
    },
    #[error("No data for device_id={device_id}")]
    NotFound { device_id: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("storage task was canceled")]
    Blocking,
}

impl From<BlockingError> for ApiError {
    fn from(_: BlockingError) -> Self {
        ApiError::Blocking
    }
}

#[derive(Debug, serde::Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'static str>,
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) | ApiError::Malformed { .. } => "validation_error",
            ApiError::NotFound { .. } => "not_found",
            ApiError::Storage(_) | ApiError::Blocking => "storage_error",
        }
    }

    fn field(&self) -> Option<&'static str> {
        match self {
            ApiError::Validation(e) => Some(e.field()),
            ApiError::Malformed { field, .. } => Some(*field),
            ApiError::NotFound { .. } => Some("device_id"),
            ApiError::Storage(_) | ApiError::Blocking => None,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Malformed { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Storage(_) | ApiError::Blocking => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let detail = match self {
            ApiError::Storage(_) | ApiError::Blocking => {
                log::error!("{self}");
                "internal storage failure".to_owned()
            }
            _ => self.to_string(),
        };

        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.kind(),
            detail,
            field: self.field(),
        })
    }
}
