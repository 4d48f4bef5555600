use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MarketplaceError>;

#[derive(Error, Debug)]
pub enum MarketplaceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger network error: {0}")]
    Ledger(String),

    #[error("Ledger RPC transport error: {0}")]
    Rpc(#[from] reqwest::Error),

    #[error("Server misconfigured: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Listing not found: {0}")]
    ListingNotFound(uuid::Uuid),

    #[error("Song not found: {0}")]
    SongNotFound(uuid::Uuid),

    #[error("Forbidden")]
    Forbidden,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ResponseError for MarketplaceError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = self.to_string();

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": error_message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            MarketplaceError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MarketplaceError::Ledger(_) => StatusCode::BAD_GATEWAY,
            MarketplaceError::Rpc(_) => StatusCode::BAD_GATEWAY,
            MarketplaceError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MarketplaceError::Validation(_) => StatusCode::BAD_REQUEST,
            MarketplaceError::ListingNotFound(_) => StatusCode::NOT_FOUND,
            MarketplaceError::SongNotFound(_) => StatusCode::NOT_FOUND,
            MarketplaceError::Forbidden => StatusCode::FORBIDDEN,
            MarketplaceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl MarketplaceError {
    fn error_type(&self) -> &str {
        match self {
            MarketplaceError::Database(_) => "database_error",
            MarketplaceError::Ledger(_) => "ledger_error",
            MarketplaceError::Rpc(_) => "ledger_transport_error",
            MarketplaceError::Config(_) => "server_misconfigured",
            MarketplaceError::Validation(_) => "validation_error",
            MarketplaceError::ListingNotFound(_) => "not_found",
            MarketplaceError::SongNotFound(_) => "not_found",
            MarketplaceError::Forbidden => "forbidden",
            MarketplaceError::Internal(_) => "internal_error",
        }
    }
}
