//! 参数树重写：把代理提取出的文件句柄填回原字段位置。

use tracing::debug;

use crate::allow_list::AllowList;
use crate::error::{InvalidPathError, RewriteError};
use crate::field_path::FieldPath;
use crate::message::RewriteMessage;
use crate::params::{ParamMap, ParamValue, Params};
use crate::registry::OpenFiles;
use crate::uploaded_file::{DeclaredUpload, open_upload};

/// 按消息顺序重写每个字段；遇到第一个错误即中止。
///
/// 已打开的句柄都登记在 `open_files` 中，出错时由调用方负责释放。
pub async fn rewrite_params(
    params: &mut Params,
    message: &RewriteMessage,
    allow_list: &AllowList,
    open_files: &mut OpenFiles,
) -> Result<(), RewriteError> {
    for (field, tmp_path) in &message.rewritten_fields {
        let path = FieldPath::parse(field)?;
        let path_override = Some(tmp_path.as_str()).filter(|value| !value.is_empty());

        if path.is_top_level() {
            let key = path.top_level();
            let declared = DeclaredUpload::from_params(Some(params.as_map()), key);
            let file = open_upload(allow_list, field, declared, path_override).await?;
            open_files.register(file.clone());
            params.set(key, ParamValue::File(file));
        } else {
            let slot = locate_slot(params.as_map_mut(), path.segments(), field)?;
            let declared = DeclaredUpload::from_params(slot.as_map(), "");
            let file = open_upload(allow_list, field, declared, path_override).await?;
            open_files.register(file.clone());
            *slot = ParamValue::File(file);
        }

        debug!(field, depth = path.depth(), "rewrote upload field");
    }
    Ok(())
}

/// 沿路径段递归下降，每一层都必须是包含下一段的 map。
fn locate_slot<'p>(
    map: &'p mut ParamMap,
    segments: &[String],
    field: &str,
) -> Result<&'p mut ParamValue, InvalidPathError> {
    let Some((head, rest)) = segments.split_first() else {
        return Err(InvalidPathError::MissingPath(field.to_string()));
    };
    let value = map
        .get_mut(head)
        .ok_or_else(|| InvalidPathError::MissingKey {
            field: field.to_string(),
            key: head.clone(),
        })?;
    if rest.is_empty() {
        return Ok(value);
    }
    match value {
        ParamValue::Map(child) => locate_slot(child, rest, field),
        other => Err(InvalidPathError::NotAMap {
            field: field.to_string(),
            key: head.clone(),
            found: other.kind(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::rewrite_params;
    use crate::allow_list::AllowList;
    use crate::error::{InvalidPathError, RewriteError};
    use crate::message::RewriteMessage;
    use crate::params::{ParamMap, ParamValue, Params};
    use crate::registry::OpenFiles;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn scalar(value: &str) -> ParamValue {
        ParamValue::Scalar(value.to_string())
    }

    fn message(fields: &[(&str, &Path)]) -> RewriteMessage {
        RewriteMessage {
            rewritten_fields: fields
                .iter()
                .map(|(field, path)| (field.to_string(), path.to_string_lossy().into_owned()))
                .collect(),
        }
    }

    fn write_upload(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).expect("write upload");
        path
    }

    #[tokio::test]
    async fn rewrites_top_level_field() {
        let temp = tempdir().expect("tempdir");
        let upload = write_upload(temp.path(), "up1", b"avatar-bytes");
        let allow_list = AllowList::new([temp.path().to_path_buf()]);

        let mut params = Params::new();
        params.set("avatar.name", scalar("me.png"));
        params.set("title", scalar("hello"));
        let mut open_files = OpenFiles::new();
        rewrite_params(
            &mut params,
            &message(&[("avatar", &upload)]),
            &allow_list,
            &mut open_files,
        )
        .await
        .expect("rewrite");

        let file = params.file(&["avatar"]).expect("avatar file");
        assert_eq!(file.read_to_end().await.expect("read"), b"avatar-bytes");
        assert_eq!(file.original_filename(), Some("me.png"));
        assert_eq!(file.path(), std::fs::canonicalize(&upload).expect("canonical"));
        assert_eq!(params.get("title"), Some(&scalar("hello")));
        assert_eq!(open_files.len(), 1);
    }

    #[tokio::test]
    async fn rewrites_nested_null_placeholder() {
        let temp = tempdir().expect("tempdir");
        let upload = write_upload(temp.path(), "up2", b"doc-bytes");
        let allow_list = AllowList::new([temp.path().to_path_buf()]);

        let mut doc = ParamMap::new();
        doc.insert("file".into(), ParamValue::Null);
        doc.insert("title".into(), scalar("report"));
        let mut params = Params::new();
        params.set("doc", ParamValue::Map(doc));

        let mut open_files = OpenFiles::new();
        rewrite_params(
            &mut params,
            &message(&[("doc[file]", &upload)]),
            &allow_list,
            &mut open_files,
        )
        .await
        .expect("rewrite");

        let file = params.file(&["doc", "file"]).expect("doc file");
        assert_eq!(file.read_to_end().await.expect("read"), b"doc-bytes");
        assert_eq!(params.get_path(&["doc", "title"]), Some(&scalar("report")));
        assert_eq!(params.get("doc").and_then(ParamValue::as_map).map(|m| m.len()), Some(2));
    }

    #[tokio::test]
    async fn rewrites_deep_leaf_without_touching_siblings() {
        let temp = tempdir().expect("tempdir");
        let upload = write_upload(temp.path(), "up3", b"deep");
        let allow_list = AllowList::new([temp.path().to_path_buf()]);

        let mut params = Params::new();
        params.insert("a[b][c][file].path", scalar("ignored")).expect("insert");
        params.insert("a[b][c][file].type", scalar("text/plain")).expect("insert");
        params.insert("a[b][c][keep]", scalar("1")).expect("insert");
        params.insert("a[b][sibling]", scalar("2")).expect("insert");
        params.insert("a[other]", scalar("3")).expect("insert");
        params.insert("top", scalar("4")).expect("insert");
        let before = params.clone();

        let mut open_files = OpenFiles::new();
        rewrite_params(
            &mut params,
            &message(&[("a[b][c][file]", &upload)]),
            &allow_list,
            &mut open_files,
        )
        .await
        .expect("rewrite");

        let file = params.file(&["a", "b", "c", "file"]).expect("deep file");
        assert_eq!(file.content_type(), "text/plain");
        assert_eq!(file.read_to_end().await.expect("read"), b"deep");
        for path in [
            &["a", "b", "c", "keep"][..],
            &["a", "b", "sibling"][..],
            &["a", "other"][..],
            &["top"][..],
        ] {
            assert_eq!(params.get_path(path), before.get_path(path), "path {path:?}");
        }
    }

    #[tokio::test]
    async fn uses_embedded_path_when_message_path_is_empty() {
        let temp = tempdir().expect("tempdir");
        let upload = write_upload(temp.path(), "embedded", b"embedded");
        let allow_list = AllowList::new([temp.path().to_path_buf()]);

        let mut params = Params::new();
        params
            .insert("doc[file].path", ParamValue::Scalar(upload.to_string_lossy().into_owned()))
            .expect("insert");
        let mut open_files = OpenFiles::new();
        let message = RewriteMessage {
            rewritten_fields: [("doc[file]".to_string(), String::new())].into(),
        };
        rewrite_params(&mut params, &message, &allow_list, &mut open_files)
            .await
            .expect("rewrite");

        let file = params.file(&["doc", "file"]).expect("file");
        assert_eq!(file.read_to_end().await.expect("read"), b"embedded");
    }

    #[tokio::test]
    async fn missing_and_misshapen_slots_are_invalid_paths() {
        let temp = tempdir().expect("tempdir");
        let upload = write_upload(temp.path(), "up", b"x");
        let allow_list = AllowList::new([temp.path().to_path_buf()]);

        let mut params = Params::new();
        params.set("doc", scalar("not a map"));
        let mut open_files = OpenFiles::new();

        let result = rewrite_params(
            &mut params,
            &message(&[("doc[file]", &upload)]),
            &allow_list,
            &mut open_files,
        )
        .await;
        assert!(matches!(
            result,
            Err(RewriteError::InvalidPath(InvalidPathError::NotAMap { found: "scalar", .. }))
        ));

        let result = rewrite_params(
            &mut params,
            &message(&[("missing[file]", &upload)]),
            &allow_list,
            &mut open_files,
        )
        .await;
        assert!(matches!(
            result,
            Err(RewriteError::InvalidPath(InvalidPathError::MissingKey { .. }))
        ));
        assert!(params.get("missing").is_none());
        assert!(open_files.is_empty());
    }

    #[tokio::test]
    async fn rejects_paths_outside_allow_list() {
        let temp = tempdir().expect("tempdir");
        let allowed = temp.path().join("allowed");
        std::fs::create_dir_all(&allowed).expect("mkdir");
        let outside = write_upload(temp.path(), "secret", b"secret");
        let allow_list = AllowList::new([allowed]);

        let mut params = Params::new();
        params.insert("doc[file]", ParamValue::Null).expect("insert");
        for field in ["avatar", "doc[file]"] {
            let mut open_files = OpenFiles::new();
            let result = rewrite_params(
                &mut params,
                &message(&[(field, &outside)]),
                &allow_list,
                &mut open_files,
            )
            .await;
            assert!(
                matches!(
                    result,
                    Err(RewriteError::InvalidPath(InvalidPathError::Insecure(_)))
                ),
                "field {field}"
            );
            assert!(open_files.is_empty());
        }
    }

    #[tokio::test]
    async fn malformed_field_stops_rewriting() {
        let temp = tempdir().expect("tempdir");
        let upload = write_upload(temp.path(), "up", b"x");
        let allow_list = AllowList::new([temp.path().to_path_buf()]);

        let mut params = Params::new();
        let mut open_files = OpenFiles::new();
        let result = rewrite_params(
            &mut params,
            &message(&[("a[b]c", &upload)]),
            &allow_list,
            &mut open_files,
        )
        .await;
        assert!(matches!(result, Err(RewriteError::MalformedField(_))));
        assert!(params.is_empty());
    }
}
