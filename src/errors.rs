use crate::recorder::RecordError;
use crate::storage::StoreError;
use axum::http::StatusCode;
use tracing::error;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn unavailable(err: impl std::error::Error) -> Self {
        error!("store unavailable: {err}");
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidUser(_) => Self::bad_request(err.to_string()),
            other => Self::unavailable(other),
        }
    }
}

impl From<RecordError> for AppError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::Store(err) => err.into(),
            RecordError::Validation(err) => Self::bad_request(err.to_string()),
            RecordError::UnknownTask(_) => Self::not_found(err.to_string()),
            RecordError::AlreadyCompleted(_) => Self {
                status: StatusCode::CONFLICT,
                message: err.to_string(),
            },
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, self.message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::followups::ValidationError;
    use crate::models::TaskId;

    #[test]
    fn record_errors_map_to_statuses() {
        let cases = [
            (RecordError::UnknownTask(TaskId::new("a")), StatusCode::NOT_FOUND),
            (RecordError::AlreadyCompleted(TaskId::new("a")), StatusCode::CONFLICT),
            (RecordError::Validation(ValidationError::EmptyName), StatusCode::BAD_REQUEST),
            (
                RecordError::Store(StoreError::InvalidUser("..".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                RecordError::Store(StoreError::Io(std::io::Error::other("disk"))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }
}
