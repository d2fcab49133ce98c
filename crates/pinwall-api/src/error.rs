use axum::{
    Json,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

use pinwall_db::DbError;
use pinwall_types::api::AdminResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized, admin credentials required")]
    Unauthorized,

    #[error("method {0} not allowed, only POST is accepted")]
    MethodNotAllowed(Method),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Db(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        (status, Json(AdminResponse::failed(self.to_string()))).into_response()
    }
}
