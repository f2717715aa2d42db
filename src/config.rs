//! CLI arguments and server configuration defaults.

use clap::Parser;
use std::path::PathBuf;

pub const MULTIPART_FIELDS_HEADER: &str = "upload-splice-multipart-fields";
pub const DEFAULT_JWT_ISSUER: &str = "upload-splice-proxy";
pub const SECRET_LENGTH: usize = 32;
pub const MAX_FORM_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
pub const DEFAULT_LOG_FILTER: &str = "info,upload_splice=debug";

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "upload-splice", version, about = "Upload offload rewriting server")]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "UPLOAD_SPLICE_BIND",
        default_value = "127.0.0.1",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "UPLOAD_SPLICE_PORT",
        default_value_t = 8181,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "UPLOAD_SPLICE_SECRET_FILE",
        help = "File holding the base64 encoded token signing secret"
    )]
    pub secret_file: PathBuf,
    #[arg(
        long,
        env = "UPLOAD_SPLICE_JWT_ISSUER",
        default_value = DEFAULT_JWT_ISSUER,
        help = "Expected issuer of rewrite tokens"
    )]
    pub jwt_issuer: String,
    #[arg(
        long,
        env = "UPLOAD_SPLICE_UPLOADS_STORAGE_PATH",
        help = "Uploads storage path"
    )]
    pub uploads_storage_path: Option<PathBuf>,
    #[arg(long, env = "UPLOAD_SPLICE_UPLOADER_ROOT", help = "File uploader root")]
    pub uploader_root: Option<PathBuf>,
    #[arg(
        long,
        env = "UPLOAD_SPLICE_ARTIFACTS_UPLOAD_PATH",
        help = "Proxy upload path for job artifacts"
    )]
    pub artifacts_upload_path: Option<PathBuf>,
    #[arg(
        long,
        env = "UPLOAD_SPLICE_LFS_UPLOAD_PATH",
        help = "Proxy upload path for LFS objects"
    )]
    pub lfs_upload_path: Option<PathBuf>,
    #[arg(
        long,
        env = "UPLOAD_SPLICE_PUBLIC_UPLOADS_TMP",
        help = "Public uploads temp directory"
    )]
    pub public_uploads_tmp: Option<PathBuf>,
    #[arg(
        long,
        env = "UPLOAD_SPLICE_PACKAGES_ENABLED",
        default_value_t = false,
        help = "Enable package uploads"
    )]
    pub packages_enabled: bool,
    #[arg(
        long,
        env = "UPLOAD_SPLICE_PACKAGES_STORAGE_PATH",
        help = "Package storage path"
    )]
    pub packages_storage_path: Option<PathBuf>,
    #[arg(
        long,
        env = "UPLOAD_SPLICE_PACKAGES_OBJECT_STORE",
        default_value_t = false,
        help = "Packages are kept in object storage"
    )]
    pub packages_object_store: bool,
    #[arg(
        long,
        env = "UPLOAD_SPLICE_PACKAGES_DIRECT_UPLOAD",
        default_value_t = false,
        help = "Packages are uploaded directly to object storage"
    )]
    pub packages_direct_upload: bool,
    #[arg(
        long,
        env = "UPLOAD_SPLICE_LOG",
        default_value = DEFAULT_LOG_FILTER,
        help = "Log filter used when RUST_LOG is unset"
    )]
    pub log_filter: String,
}

impl Args {
    /// 提取白名单所需的存储配置。
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            temp_dir: std::env::temp_dir(),
            uploads_storage_path: self.uploads_storage_path.clone(),
            uploader_root: self.uploader_root.clone(),
            artifacts_upload_path: self.artifacts_upload_path.clone(),
            lfs_upload_path: self.lfs_upload_path.clone(),
            public_uploads_tmp: self.public_uploads_tmp.clone(),
            packages: PackagesConfig {
                enabled: self.packages_enabled,
                storage_path: self.packages_storage_path.clone(),
                object_store_enabled: self.packages_object_store,
                direct_upload: self.packages_direct_upload,
            },
        }
    }
}

/// 存储根目录配置。
#[derive(Clone, Debug, Default)]
pub struct StorageConfig {
    pub temp_dir: PathBuf,
    pub uploads_storage_path: Option<PathBuf>,
    pub uploader_root: Option<PathBuf>,
    pub artifacts_upload_path: Option<PathBuf>,
    pub lfs_upload_path: Option<PathBuf>,
    pub public_uploads_tmp: Option<PathBuf>,
    pub packages: PackagesConfig,
}

#[derive(Clone, Debug, Default)]
pub struct PackagesConfig {
    pub enabled: bool,
    pub storage_path: Option<PathBuf>,
    pub object_store_enabled: bool,
    pub direct_upload: bool,
}

impl PackagesConfig {
    /// 包存储路径仅在本地落盘时加入白名单。
    pub fn allowed_path(&self) -> Option<&PathBuf> {
        if !self.enabled {
            return None;
        }
        if self.object_store_enabled && self.direct_upload {
            return None;
        }
        self.storage_path.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::PackagesConfig;
    use std::path::PathBuf;

    #[test]
    fn packages_path_requires_local_storage() {
        let mut packages = PackagesConfig {
            enabled: true,
            storage_path: Some(PathBuf::from("/srv/packages")),
            object_store_enabled: false,
            direct_upload: false,
        };
        assert_eq!(
            packages.allowed_path(),
            Some(&PathBuf::from("/srv/packages"))
        );

        packages.object_store_enabled = true;
        assert!(packages.allowed_path().is_some());

        packages.direct_upload = true;
        assert!(packages.allowed_path().is_none());

        packages.object_store_enabled = false;
        packages.enabled = false;
        assert!(packages.allowed_path().is_none());
    }
}
