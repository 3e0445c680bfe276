use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

use crate::{GatewayError, NotFoundKind};

/// One per-field problem inside an [`ApiError`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorDetail {
    pub sub_code: String,
    pub field: String,
    pub message: String,
}

/// JSON body returned for every failed REST call.
///
/// `code` is `"SSS.NNN"`: the HTTP status followed by a per-kind sub-code.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub code: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ApiErrorDetail>,
}

impl ApiError {
    fn new(status: StatusCode, sub_code: u16, description: String) -> Self {
        Self {
            code: format!("{:03}.{:03}", status.as_u16(), sub_code),
            description,
            details: Vec::new(),
        }
    }

    fn with_detail(mut self, sub_code: &str, field: &str, message: &str) -> Self {
        self.details.push(ApiErrorDetail {
            sub_code: sub_code.to_string(),
            field: field.to_string(),
            message: message.to_string(),
        });
        self
    }
}

impl From<&GatewayError> for ApiError {
    fn from(e: &GatewayError) -> Self {
        let status = e.status_code();
        match e {
            GatewayError::NotFound { kind, id } => {
                let sub_code = match kind {
                    NotFoundKind::Environment => 1,
                    NotFoundKind::Model => 2,
                    NotFoundKind::Subscription => 3,
                };
                ApiError::new(status, sub_code, e.to_string()).with_detail(
                    kind.as_str(),
                    id,
                    "not found",
                )
            }
            GatewayError::Validation { message, fields } => fields.iter().fold(
                ApiError::new(status, 1, message.clone()),
                |err, (field, problem)| err.with_detail("VALIDATION", field, problem),
            ),
            GatewayError::Subscription(items) => items.iter().fold(
                ApiError::new(status, 2, e.to_string()),
                |err, item| err.with_detail("MAPPING", &item.key, &item.to_string()),
            ),
            GatewayError::DataProcessing(_) => ApiError::new(status, 2, e.to_string()),
            _ => ApiError::new(status, 1, e.to_string()),
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::Validation { .. } | GatewayError::Subscription(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiError::from(self))
    }
}
