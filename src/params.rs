//! 请求参数树：查询串与表单请求体解析为嵌套的带标签值。

use axum::body::Body as AxumBody;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request};
use axum::http::{StatusCode, header, request::Parts};
use http_body_util::{LengthLimitError, Limited};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use tower::{Layer, ServiceExt, service_fn};
use tracing::debug;

use crate::config::MAX_FORM_SIZE;
use crate::error::{ApiError, ParamsError};
use crate::uploaded_file::UploadedFile;

pub type ParamMap = BTreeMap<String, ParamValue>;

/// 单个参数值。重写后文件字段变为 `File`。
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Null,
    Scalar(String),
    List(Vec<ParamValue>),
    Map(ParamMap),
    File(UploadedFile),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ParamMap> {
        match self {
            ParamValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&UploadedFile> {
        match self {
            ParamValue::File(file) => Some(file),
            _ => None,
        }
    }

    /// 变体名称，用于错误信息。
    pub fn kind(&self) -> &'static str {
        match self {
            ParamValue::Null => "null",
            ParamValue::Scalar(_) => "scalar",
            ParamValue::List(_) => "list",
            ParamValue::Map(_) => "map",
            ParamValue::File(_) => "file",
        }
    }
}

/// 表单键的一段：命名键或列表追加（`[]`）。
#[derive(Clone, Debug, PartialEq, Eq)]
enum KeySegment {
    Key(String),
    Append,
}

/// 宽松解析表单键：`a[b][]`，以及 `a[b].path` 这类括号后的后缀。
fn parse_form_key(key: &str) -> Vec<KeySegment> {
    let (head, mut rest) = match key.find('[') {
        Some(0) | None => (key, ""),
        Some(index) => key.split_at(index),
    };
    let mut segments = vec![KeySegment::Key(head.to_string())];

    while !rest.is_empty() {
        if let Some(inner) = rest.strip_prefix('[') {
            match inner.find(']') {
                Some(end) => {
                    let name = &inner[..end];
                    segments.push(if name.is_empty() {
                        KeySegment::Append
                    } else {
                        KeySegment::Key(name.to_string())
                    });
                    rest = &inner[end + 1..];
                }
                None => {
                    segments.push(KeySegment::Key(inner.to_string()));
                    break;
                }
            }
        } else {
            let end = rest.find('[').unwrap_or(rest.len());
            segments.push(KeySegment::Key(rest[..end].to_string()));
            rest = &rest[end..];
        }
    }

    segments
}

/// 完整的请求参数树。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params {
    root: ParamMap,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.root.get(key)
    }

    /// 按路径段逐层查找。
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&ParamValue> {
        let (head, rest) = path.split_first()?;
        let mut current = self.root.get(head.as_ref())?;
        for segment in rest {
            current = current.as_map()?.get(segment.as_ref())?;
        }
        Some(current)
    }

    pub fn file<S: AsRef<str>>(&self, path: &[S]) -> Option<&UploadedFile> {
        self.get_path(path).and_then(ParamValue::as_file)
    }

    pub fn set(&mut self, key: impl Into<String>, value: ParamValue) {
        self.root.insert(key.into(), value);
    }

    pub fn as_map(&self) -> &ParamMap {
        &self.root
    }

    pub fn as_map_mut(&mut self) -> &mut ParamMap {
        &mut self.root
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.root.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// 按表单嵌套编码写入一个值，后写入的同名值覆盖先前的值。
    pub fn insert(&mut self, key: &str, value: ParamValue) -> Result<(), ParamsError> {
        if key.is_empty() {
            return Ok(());
        }
        let segments = parse_form_key(key);
        insert_into_map(&mut self.root, &segments, value, key)
    }

    /// 从查询串与表单请求体构建参数，请求体的值覆盖查询串。
    pub async fn from_request_parts(parts: &Parts, body: AxumBody) -> Result<Self, ParamsError> {
        let mut params = Params::new();
        if let Some(query) = parts.uri.query() {
            params.extend_urlencoded(query.as_bytes())?;
        }

        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/x-www-form-urlencoded" => {
                let bytes = axum::body::to_bytes(body, MAX_FORM_SIZE)
                    .await
                    .map_err(body_error)?;
                params.extend_urlencoded(&bytes)?;
            }
            "multipart/form-data" => {
                params.extend_multipart(parts, body).await?;
            }
            _ => {}
        }

        debug!(count = params.root.len(), "parsed request params");
        Ok(params)
    }

    fn extend_urlencoded(&mut self, input: &[u8]) -> Result<(), ParamsError> {
        for (key, value) in url::form_urlencoded::parse(input) {
            self.insert(&key, ParamValue::Scalar(value.into_owned()))?;
        }
        Ok(())
    }

    async fn extend_multipart(&mut self, parts: &Parts, body: AxumBody) -> Result<(), ParamsError> {
        let mut request = Request::new(AxumBody::new(Limited::new(body, MAX_FORM_SIZE)));
        *request.headers_mut() = parts.headers.clone();
        *request.extensions_mut() = parts.extensions.clone();
        // 上限由 `Limited` 施加，去掉 axum 默认的 2 MiB 限制。
        let extract = service_fn(|request: Request| async move {
            Multipart::from_request(request, &()).await
        });
        let mut multipart = DefaultBodyLimit::disable()
            .layer(extract)
            .oneshot(request)
            .await
            .map_err(|rejection| ParamsError::Multipart(rejection.body_text()))?;

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if field.file_name().is_some() {
                return Err(ParamsError::FilePart(name));
            }
            let value = field.text().await.map_err(multipart_error)?;
            self.insert(&name, ParamValue::Scalar(value))?;
        }
        Ok(())
    }
}

/// 区分超出长度上限与其它读取失败（如客户端断开）。
fn body_error(err: axum::Error) -> ParamsError {
    let mut source: Option<&(dyn StdError + 'static)> = Some(&err);
    while let Some(current) = source {
        if current.is::<LengthLimitError>() {
            return ParamsError::TooLarge(MAX_FORM_SIZE);
        }
        source = current.source();
    }
    ParamsError::Body(err.to_string())
}

fn multipart_error(err: MultipartError) -> ParamsError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ParamsError::TooLarge(MAX_FORM_SIZE)
    } else {
        ParamsError::Multipart(err.to_string())
    }
}

fn insert_into_map(
    map: &mut ParamMap,
    segments: &[KeySegment],
    value: ParamValue,
    key: &str,
) -> Result<(), ParamsError> {
    let Some((KeySegment::Key(name), rest)) = segments.split_first() else {
        return Err(ParamsError::Conflict(key.to_string()));
    };
    if rest.is_empty() {
        map.insert(name.clone(), value);
        return Ok(());
    }

    let slot = map.entry(name.clone()).or_insert_with(|| match rest[0] {
        KeySegment::Append => ParamValue::List(Vec::new()),
        KeySegment::Key(_) => ParamValue::Map(ParamMap::new()),
    });
    insert_into_value(slot, rest, value, key)
}

fn insert_into_value(
    slot: &mut ParamValue,
    segments: &[KeySegment],
    value: ParamValue,
    key: &str,
) -> Result<(), ParamsError> {
    match (&segments[0], slot) {
        (KeySegment::Key(_), ParamValue::Map(child)) => {
            insert_into_map(child, segments, value, key)
        }
        (KeySegment::Append, ParamValue::List(items)) => {
            let rest = &segments[1..];
            let Some(KeySegment::Key(next)) = rest.first() else {
                if rest.is_empty() {
                    items.push(value);
                    return Ok(());
                }
                return Err(ParamsError::Conflict(key.to_string()));
            };
            // `a[][b]` 合并到末尾元素，直到该元素已包含 `b`。
            let reuse_last = matches!(
                items.last(),
                Some(ParamValue::Map(last)) if !last.contains_key(next)
            );
            if !reuse_last {
                items.push(ParamValue::Map(ParamMap::new()));
            }
            match items.last_mut() {
                Some(ParamValue::Map(last)) => insert_into_map(last, rest, value, key),
                _ => Err(ParamsError::Conflict(key.to_string())),
            }
        }
        _ => Err(ParamsError::Conflict(key.to_string())),
    }
}

impl<S> FromRequest<S> for Params
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    /// 优先返回中间件写入的重写结果，否则自行解析请求。
    async fn from_request(mut req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(params) = req.extensions_mut().remove::<Params>() {
            return Ok(params);
        }
        let (parts, body) = req.into_parts();
        Ok(Params::from_request_parts(&parts, body).await?)
    }
}
