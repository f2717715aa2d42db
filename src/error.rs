//! 统一的错误类型：重写流程的领域错误与 API 响应转换。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 签名消息解码失败。
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("rewrite token is empty")]
    Empty,
    #[error("rewrite token is not valid utf-8")]
    NotUtf8,
    #[error("invalid rewrite token: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("invalid signing secret: {0}")]
    Secret(String),
}

/// 字段路径不符合嵌套编码语法。
#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed field {field:?}: {reason}")]
pub struct MalformedFieldError {
    pub field: String,
    pub reason: &'static str,
}

impl MalformedFieldError {
    pub(crate) fn new(field: &str, reason: &'static str) -> Self {
        Self {
            field: field.to_string(),
            reason,
        }
    }
}

/// 路径不在白名单内，或参数槽位不存在 / 形状不匹配。
#[derive(Debug, Error)]
pub enum InvalidPathError {
    #[error("insecure path used '{}'", .0.display())]
    Insecure(PathBuf),
    #[error("relative path used '{}'", .0.display())]
    Relative(PathBuf),
    #[error("cannot resolve path '{}': {source}", .path.display())]
    Unresolvable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("not a regular file '{}'", .0.display())]
    NotAFile(PathBuf),
    #[error("no file path given for field {0:?}")]
    MissingPath(String),
    #[error("invalid field {field:?}: key {key:?} not found")]
    MissingKey { field: String, key: String },
    #[error("invalid field {field:?}: expected map at {key:?}, found {found}")]
    NotAMap {
        field: String,
        key: String,
        found: &'static str,
    },
}

/// 重写阶段的错误（均为终止性错误）。
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error(transparent)]
    MalformedField(#[from] MalformedFieldError),
    #[error(transparent)]
    InvalidPath(#[from] InvalidPathError),
}

/// 句柄正被读取，无法立即关闭。
#[derive(Debug, Error)]
#[error("upload handle for '{}' is busy", .0.display())]
pub struct CloseError(pub PathBuf);

/// 请求参数解析失败。
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("request body exceeds {0} bytes")]
    TooLarge(usize),
    #[error("failed to read request body: {0}")]
    Body(String),
    #[error("invalid multipart body: {0}")]
    Multipart(String),
    #[error("file part {0:?} was not offloaded")]
    FilePart(String),
    #[error("conflicting parameter {0:?}")]
    Conflict(String),
}

pub enum ApiError {
    BadRequest(String),
    PayloadTooLarge(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg).into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<DecodeError> for ApiError {
    fn from(error: DecodeError) -> Self {
        ApiError::BadRequest(error.to_string())
    }
}

impl From<RewriteError> for ApiError {
    fn from(error: RewriteError) -> Self {
        ApiError::BadRequest(error.to_string())
    }
}

impl From<ParamsError> for ApiError {
    fn from(error: ParamsError) -> Self {
        match error {
            ParamsError::TooLarge(limit) => {
                ApiError::PayloadTooLarge(format!("request body exceeds {limit} bytes"))
            }
            ParamsError::Body(msg) => ApiError::Internal(msg),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}
