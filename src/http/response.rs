// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Response envelope and request binding.
//!
//! Every endpoint answers `{"status","code","data","error","trace_id"}`.
//! Error codes carry their HTTP status in the leading digits: the status is
//! the code integer-divided by 100000.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;
use validator::{Validate, ValidationErrors};

/// Invalid-input error family (HTTP 400).
pub const INVALID_INPUT_CODE: i32 = 40001400;
/// Server-error family (HTTP 500).
pub const SERVER_ERROR_CODE: i32 = 50001500;

const INVALID_INPUT_MSG: &str = "Invalid input parameters";
const SERVER_ERROR_MSG: &str = "Internal server error";

/// Structured error carried in the response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub code: i32,
    pub message: String,
    pub reason: String,
}

impl ErrorInfo {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self {
            code: INVALID_INPUT_CODE,
            message: INVALID_INPUT_MSG.to_string(),
            reason: reason.into(),
        }
    }

    pub fn server_error(reason: impl Into<String>) -> Self {
        Self {
            code: SERVER_ERROR_CODE,
            message: SERVER_ERROR_MSG.to_string(),
            reason: reason.into(),
        }
    }

    fn with_message(mut self, message: String) -> Self {
        self.message = message;
        self
    }

    pub fn http_status(&self) -> StatusCode {
        StatusCode::from_u16((self.code / 100_000) as u16)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    status: &'static str,
    code: i32,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorInfo>,
    trace_id: String,
}

/// 200 with no payload.
pub fn res_ok(trace_id: &str) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            status: "OK",
            code: 200,
            data: None::<()>,
            error: None,
            trace_id: trace_id.to_string(),
        }),
    )
        .into_response()
}

/// 200 with a data payload.
pub fn res_success<T: Serialize>(trace_id: &str, data: T) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            status: "OK",
            code: 200,
            data: Some(data),
            error: None,
            trace_id: trace_id.to_string(),
        }),
    )
        .into_response()
}

/// Error envelope; the HTTP status derives from the error code family.
pub fn res_error(trace_id: &str, error: ErrorInfo) -> Response {
    let status = error.http_status();
    (
        status,
        Json(Envelope {
            status: "ERROR",
            code: status.as_u16() as i32,
            data: None::<()>,
            error: Some(error),
            trace_id: trace_id.to_string(),
        }),
    )
        .into_response()
}

/// Bind a JSON body into a validated request struct, translating both serde
/// and validator failures into the invalid-input envelope.
pub fn parse_json<T>(body: &[u8]) -> Result<T, ErrorInfo>
where
    T: DeserializeOwned + Validate,
{
    let value: T = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(err) => {
            let detail = if err.is_data() {
                "invalid field value"
            } else {
                "invalid JSON format"
            };
            return Err(ErrorInfo::invalid_input(err.to_string())
                .with_message(format!("{INVALID_INPUT_MSG}: {detail}")));
        }
    };
    value.validate().map_err(|errors| translate_validation(&errors))?;
    Ok(value)
}

/// Flatten validator output into one human-readable message, keeping the
/// raw error string as the reason for debugging.
fn translate_validation(errors: &ValidationErrors) -> ErrorInfo {
    let mut parts: Vec<String> = Vec::new();
    for (field, field_errors) in errors.field_errors() {
        for error in field_errors.iter() {
            let detail = error
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| error.code.to_string());
            parts.push(format!("field {field} {detail}"));
        }
    }
    parts.sort();
    ErrorInfo::invalid_input(errors.to_string())
        .with_message(format!("{}: {}", INVALID_INPUT_MSG, parts.join("; ")))
}
