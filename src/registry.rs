//! 单次请求内打开的上传句柄登记与统一释放。

use tracing::{debug, warn};

use crate::uploaded_file::UploadedFile;

/// 请求期间打开的所有句柄。drop 时自动释放，覆盖错误与取消路径。
#[derive(Debug, Default)]
pub struct OpenFiles {
    files: Vec<UploadedFile>,
}

impl OpenFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, file: UploadedFile) {
        self.files.push(file);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// 逐个关闭句柄；单个失败只记录日志，不影响其余句柄。返回实际关闭的数量。
    pub fn release(&mut self) -> usize {
        let mut closed = 0;
        for file in self.files.drain(..) {
            match file.close() {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(err) => warn!(error = %err, "failed to close upload handle"),
            }
        }
        if closed > 0 {
            debug!(count = closed, "released upload handles");
        }
        closed
    }
}

impl Drop for OpenFiles {
    fn drop(&mut self) {
        self.release();
    }
}
