//! 已打开的上传文件句柄，以及按白名单打开文件的入口。

use std::fmt;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use crate::allow_list::AllowList;
use crate::config::DEFAULT_CONTENT_TYPE;
use crate::error::{CloseError, InvalidPathError};
use crate::params::{ParamMap, ParamValue};

/// 占位参数中声明的上传元数据（`<prefix>.path`、`<prefix>.name` 等）。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeclaredUpload {
    pub path: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub sha256: Option<String>,
    pub size: Option<u64>,
}

impl DeclaredUpload {
    /// 从参数表读取以 `prefix` 开头的声明字段。
    pub fn from_params(params: Option<&ParamMap>, prefix: &str) -> Self {
        let Some(params) = params else {
            return Self::default();
        };
        let lookup = |suffix: &str| {
            params
                .get(&format!("{prefix}.{suffix}"))
                .and_then(ParamValue::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Self {
            path: lookup("path"),
            filename: lookup("name"),
            content_type: lookup("type"),
            sha256: lookup("sha256"),
            size: lookup("size").and_then(|value| value.parse().ok()),
        }
    }
}

/// 下游可见的上传文件。克隆共享同一个底层句柄。
#[derive(Clone)]
pub struct UploadedFile {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    declared: DeclaredUpload,
    len: u64,
    handle: Mutex<Option<File>>,
    closed: AtomicBool,
}

impl UploadedFile {
    fn new(path: PathBuf, file: File, declared: DeclaredUpload, len: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                path,
                declared,
                len,
                handle: Mutex::new(Some(file)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// 打开文件时使用的规范化路径。
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn original_filename(&self) -> Option<&str> {
        self.inner.declared.filename.as_deref()
    }

    pub fn content_type(&self) -> &str {
        self.inner
            .declared
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    pub fn sha256(&self) -> Option<&str> {
        self.inner.declared.sha256.as_deref()
    }

    /// 声明的大小，缺省时为打开时的文件长度。
    pub fn size(&self) -> u64 {
        self.inner.declared.size.unwrap_or(self.inner.len)
    }

    pub fn declared(&self) -> &DeclaredUpload {
        &self.inner.declared
    }

    /// 从头读取全部内容。
    pub async fn read_to_end(&self) -> io::Result<Vec<u8>> {
        let mut guard = self.inner.handle.lock().await;
        let file = guard
            .as_mut()
            .ok_or_else(|| io::Error::other("upload handle already closed"))?;
        file.seek(SeekFrom::Start(0)).await?;
        let mut contents = Vec::with_capacity(self.inner.len as usize);
        file.read_to_end(&mut contents).await?;
        Ok(contents)
    }

    /// 不获取锁，读取进行中也能得到准确结果。
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 关闭句柄。返回本次调用是否真正关闭了文件，重复调用不会再次关闭。
    pub fn close(&self) -> Result<bool, CloseError> {
        let mut guard = self
            .inner
            .handle
            .try_lock()
            .map_err(|_| CloseError(self.inner.path.clone()))?;
        let closed = guard.take().is_some();
        self.inner.closed.store(true, Ordering::Release);
        Ok(closed)
    }

    pub fn same_handle(&self, other: &UploadedFile) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for UploadedFile {
    fn eq(&self, other: &Self) -> bool {
        self.same_handle(other)
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("path", &self.inner.path)
            .field("filename", &self.inner.declared.filename)
            .field("content_type", &self.content_type())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 解析路径、校验白名单后以只读方式打开文件。
///
/// 路径优先取自重写消息中的 `path_override`，否则取占位参数里的
/// `<prefix>.path`。校验失败时不会打开任何文件。
pub async fn open_upload(
    allow_list: &AllowList,
    field: &str,
    declared: DeclaredUpload,
    path_override: Option<&str>,
) -> Result<UploadedFile, InvalidPathError> {
    let raw_path = path_override
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .or_else(|| declared.path.clone())
        .ok_or_else(|| InvalidPathError::MissingPath(field.to_string()))?;

    let canonical = allow_list.authorize(Path::new(&raw_path)).await?;
    let file = File::open(&canonical)
        .await
        .map_err(|source| InvalidPathError::Unresolvable {
            path: canonical.clone(),
            source,
        })?;
    let metadata = file
        .metadata()
        .await
        .map_err(|source| InvalidPathError::Unresolvable {
            path: canonical.clone(),
            source,
        })?;
    if !metadata.is_file() {
        return Err(InvalidPathError::NotAFile(canonical));
    }

    Ok(UploadedFile::new(canonical, file, declared, metadata.len()))
}
