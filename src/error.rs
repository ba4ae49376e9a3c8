use rocket::http::Status;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;

/// Stable wire-level error codes. The string form is part of the protocol
/// contract and must never change once shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotMember,
    ConvNotFound,
    Conflict,
    RateLimited,
    PayloadTooLarge,
    InvalidFrame,
    InvalidAck,
    ReplayWindowExceeded,
    SlowConsumer,
    StorageUnavailable,
    NotFound,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotMember => "not_member",
            ErrorCode::ConvNotFound => "conv_not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::PayloadTooLarge => "payload_too_large",
            ErrorCode::InvalidFrame => "invalid_frame",
            ErrorCode::InvalidAck => "invalid_ack",
            ErrorCode::ReplayWindowExceeded => "replay_window_exceeded",
            ErrorCode::SlowConsumer => "slow_consumer",
            ErrorCode::StorageUnavailable => "storage_unavailable",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Internal => "internal",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            ErrorCode::Unauthorized => Status::Unauthorized,
            ErrorCode::Forbidden | ErrorCode::NotMember => Status::Forbidden,
            ErrorCode::ConvNotFound | ErrorCode::NotFound => Status::NotFound,
            ErrorCode::Conflict => Status::Conflict,
            ErrorCode::RateLimited => Status::TooManyRequests,
            ErrorCode::PayloadTooLarge
            | ErrorCode::InvalidFrame
            | ErrorCode::InvalidAck
            | ErrorCode::ReplayWindowExceeded => Status::BadRequest,
            ErrorCode::SlowConsumer => Status::BadRequest,
            ErrorCode::StorageUnavailable => Status::ServiceUnavailable,
            ErrorCode::Internal => Status::InternalServerError,
        }
    }
}

/// Error outcome carried through the core as an explicit value and translated
/// to `{code, message, ...details}` at the transport boundary.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: ErrorCode,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        ApiError {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    /// Map a storage failure. The row was not written; the caller may retry.
    pub fn storage(err: rusqlite::Error) -> Self {
        eprintln!("⚠️  Storage error: {err}");
        ApiError::new(
            ErrorCode::StorageUnavailable,
            "Storage temporarily unavailable",
        )
    }

    /// JSON body shape shared by HTTP responses and in-stream error frames:
    /// `{code, message}` with any structured details flattened alongside.
    pub fn body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "code": self.code.as_str(),
            "message": self.message,
        });
        if let Some(serde_json::Value::Object(details)) = &self.details {
            let obj = body.as_object_mut().unwrap();
            for (k, v) in details {
                obj.insert(k.clone(), v.clone());
            }
        }
        body
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.code.status();
        Response::build_from(Json(self.body()).respond_to(req)?)
            .status(status)
            .ok()
    }
}
