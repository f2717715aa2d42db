//! 上传文件路径白名单：规范化候选路径并校验其位于允许的根目录内。

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::error::InvalidPathError;

/// 启动时构建、之后只读的目录前缀集合。
#[derive(Clone, Debug, Default)]
pub struct AllowList {
    roots: Vec<PathBuf>,
}

impl AllowList {
    /// 规范化每个根目录；无法解析的根目录会被跳过。
    pub fn new<I>(roots: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut canonical_roots: Vec<PathBuf> = Vec::new();
        for root in roots {
            if !root.is_absolute() {
                warn!(root = ?root, "ignoring relative allow-list root");
                continue;
            }
            match std::fs::canonicalize(&root) {
                Ok(canonical) => {
                    if !canonical_roots.contains(&canonical) {
                        canonical_roots.push(canonical);
                    }
                }
                Err(err) => {
                    warn!(root = ?root, error = %err, "ignoring unresolvable allow-list root");
                }
            }
        }
        Self {
            roots: canonical_roots,
        }
    }

    /// 由存储配置构建：系统临时目录总是包含在内。
    pub fn from_config(config: &StorageConfig) -> Self {
        let mut roots = vec![config.temp_dir.clone()];
        roots.extend(
            [
                config.uploader_root.as_ref(),
                config.uploads_storage_path.as_ref(),
                config.artifacts_upload_path.as_ref(),
                config.lfs_upload_path.as_ref(),
                config.public_uploads_tmp.as_ref(),
                config.packages.allowed_path(),
            ]
            .into_iter()
            .flatten()
            .cloned(),
        );
        Self::new(roots)
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// 判断已规范化的路径是否位于某个根目录内（按路径组件比较）。
    pub fn is_permitted(&self, canonical: &Path) -> bool {
        self.roots.iter().any(|root| canonical.starts_with(root))
    }

    /// 解析符号链接与 `..` 后校验路径，返回规范化路径。
    pub async fn authorize(&self, candidate: &Path) -> Result<PathBuf, InvalidPathError> {
        if !candidate.is_absolute() {
            return Err(InvalidPathError::Relative(candidate.to_path_buf()));
        }
        let canonical = fs::canonicalize(candidate).await.map_err(|source| {
            InvalidPathError::Unresolvable {
                path: candidate.to_path_buf(),
                source,
            }
        })?;
        if !self.is_permitted(&canonical) {
            warn!(path = ?candidate, resolved = ?canonical, "rejected path outside allow-list");
            return Err(InvalidPathError::Insecure(canonical));
        }
        debug!(path = ?canonical, "path authorized");
        Ok(canonical)
    }
}
