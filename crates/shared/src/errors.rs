use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use domain::DomainError;
use std::fmt;

#[derive(Debug)]
pub struct ApiError {
    pub message: String,
    pub status_code: u16,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError {
            message: message.into(),
            status_code: 404,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            message: message.into(),
            status_code: 400,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.message,
        }))
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound { .. } => ApiError {
                message: err.to_string(),
                status_code: 404,
            },
            DomainError::Validation(_) | DomainError::Config(_) | DomainError::DependencyCycle(_) => {
                ApiError {
                    message: err.to_string(),
                    status_code: 400,
                }
            }
            DomainError::Conflict(_) => ApiError {
                message: err.to_string(),
                status_code: 409,
            },
            DomainError::Transient(_) => ApiError {
                message: err.to_string(),
                status_code: 503,
            },
            _ => ApiError {
                message: "Internal server error".to_string(),
                status_code: 500,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_http_statuses() {
        let not_found: ApiError = DomainError::not_found("build", "abc").into();
        assert_eq!(not_found.status_code, 404);

        let conflict: ApiError = DomainError::Conflict("exists".into()).into();
        assert_eq!(conflict.status_code, 409);

        let config: ApiError = DomainError::Config("bad yaml".into()).into();
        assert_eq!(config.status_code, 400);

        let internal: ApiError = DomainError::Internal("boom".into()).into();
        assert_eq!(internal.message, "Internal server error");
    }
}
