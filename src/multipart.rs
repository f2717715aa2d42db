//! 上传卸载中间件。
//!
//! 前置代理把 multipart 请求中的文件部分落盘到临时目录，并通过请求头传来
//! 签名消息，列出被提取的字段及其临时文件路径。本中间件解码该消息，按白名单
//! 打开文件，把句柄放回参数树中原本的位置，然后调用下游处理器；处理结束
//! （包括出错或被取消）后统一关闭所有句柄。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Request};
use axum::http::header;
use axum::middleware;
use axum::response::Response;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::allow_list::AllowList;
use crate::config::MULTIPART_FIELDS_HEADER;
use crate::error::{ApiError, DecodeError};
use crate::message::MessageDecoder;
use crate::params::Params;
use crate::registry::OpenFiles;
use crate::rewrite::rewrite_params;

/// 进程级共享、只读的中间件依赖。
pub struct MultipartRewriter {
    decoder: Arc<dyn MessageDecoder>,
    allow_list: AllowList,
}

impl MultipartRewriter {
    pub fn new(decoder: Arc<dyn MessageDecoder>, allow_list: AllowList) -> Self {
        Self {
            decoder,
            allow_list,
        }
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }
}

/// 中间件入口：无令牌时原样转发。
pub async fn rewrite_multipart(
    Extension(rewriter): Extension<Arc<MultipartRewriter>>,
    mut req: Request,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    let Some(token) = req.headers_mut().remove(MULTIPART_FIELDS_HEADER) else {
        return Ok(next.run(req).await);
    };
    if token.as_bytes().iter().all(u8::is_ascii_whitespace) {
        return Ok(next.run(req).await);
    }

    let token = token.to_str().map_err(|_| DecodeError::NotUtf8);
    let message = token
        .and_then(|token| rewriter.decoder.decode(token))
        .map_err(|err| {
            warn!(error = %err, "rejected rewrite token");
            ApiError::from(err)
        })?;

    let (mut parts, body) = req.into_parts();
    let mut params = Params::from_request_parts(&parts, body).await?;

    let mut open_files = OpenFiles::new();
    if let Err(err) = rewrite_params(
        &mut params,
        &message,
        &rewriter.allow_list,
        &mut open_files,
    )
    .await
    {
        warn!(error = %err, opened = open_files.len(), "rewrite failed");
        open_files.release();
        return Err(err.into());
    }
    debug!(
        fields = message.rewritten_fields.len(),
        opened = open_files.len(),
        "rewrote multipart request"
    );

    parts.headers.remove(header::CONTENT_LENGTH);
    parts.extensions.insert(params);
    let req = Request::from_parts(parts, AxumBody::empty());
    let response = next.run(req).await;

    open_files.release();
    Ok(response)
}
