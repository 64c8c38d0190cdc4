//! HTTP response types and utilities
//!
//! Every endpoint answers with the same envelope so consumers can check
//! `success` before looking at `data`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::coordinator::PollStatus;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, String>>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error_with_details(message: String, details: HashMap<String, String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            details: Some(details),
            timestamp: chrono::Utc::now(),
        }
    }
}

pub fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// 503 while a coordinator has not completed its first refresh
pub fn not_ready(coordinator: &str, status: &PollStatus) -> Response {
    let mut details = HashMap::from([("coordinator".to_string(), coordinator.to_string())]);
    if let Some(error) = &status.last_error {
        details.insert("last_error".to_string(), error.clone());
    }
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse::error_with_details(
            format!("{coordinator} data not available yet"),
            details,
        )),
    )
        .into_response()
}

/// 401 once the device has rejected the configured credentials
pub fn reauth_required(coordinator: &str) -> Response {
    let details = HashMap::from([
        ("coordinator".to_string(), coordinator.to_string()),
        ("reauth_required".to_string(), "true".to_string()),
    ]);
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::error_with_details(
            "Device rejected the configured credentials".to_string(),
            details,
        )),
    )
        .into_response()
}
