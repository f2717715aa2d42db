//! 上传检查接口：以 JSON 返回处理器实际看到的参数。

use axum::response::Json as JsonResponse;
use serde_json::{Map, Value, json};
use std::future::Future;
use std::pin::Pin;
use tracing::info;

use crate::error::ApiError;
use crate::params::{ParamValue, Params};
use crate::uploaded_file::UploadedFile;

/// 返回参数树，文件字段替换为其元数据与实际读取的字节数。
pub async fn inspect_upload(params: Params) -> Result<JsonResponse<Value>, ApiError> {
    let mut body = Map::new();
    let mut files = 0usize;
    for (key, value) in params.iter() {
        body.insert(key.clone(), describe(value, &mut files).await?);
    }
    info!(fields = body.len(), files, "inspected upload");
    Ok(JsonResponse(Value::Object(body)))
}

fn describe<'a>(
    value: &'a ParamValue,
    files: &'a mut usize,
) -> Pin<Box<dyn Future<Output = Result<Value, ApiError>> + Send + 'a>> {
    Box::pin(async move {
        Ok(match value {
            ParamValue::Null => Value::Null,
            ParamValue::Scalar(text) => Value::String(text.clone()),
            ParamValue::List(items) => {
                let mut described = Vec::with_capacity(items.len());
                for item in items {
                    described.push(describe(item, files).await?);
                }
                Value::Array(described)
            }
            ParamValue::Map(map) => {
                let mut described = Map::new();
                for (key, item) in map {
                    described.insert(key.clone(), describe(item, files).await?);
                }
                Value::Object(described)
            }
            ParamValue::File(file) => {
                *files += 1;
                describe_file(file).await?
            }
        })
    })
}

async fn describe_file(file: &UploadedFile) -> Result<Value, ApiError> {
    let contents = file
        .read_to_end()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(json!({
        "path": file.path().to_string_lossy(),
        "filename": file.original_filename(),
        "contentType": file.content_type(),
        "sha256": file.sha256(),
        "size": file.size(),
        "bytesRead": contents.len(),
    }))
}
