//! 重写字段路径解析：`key`、`key[a]`、`key[a][b]`。

use std::fmt;
use std::str::FromStr;

use crate::error::MalformedFieldError;

/// 单个重写字段对应的有序路径段，首段为顶层参数名。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// 按表单嵌套编码解析字段名，只接受 `key` 或 `key[k2]...[kN]`。
    pub fn parse(field: &str) -> Result<Self, MalformedFieldError> {
        if field.is_empty() {
            return Err(MalformedFieldError::new(field, "empty field"));
        }
        if field.contains(['&', ';']) {
            return Err(MalformedFieldError::new(field, "more than one top-level key"));
        }
        if field.contains('=') {
            return Err(MalformedFieldError::new(field, "unexpected value assignment"));
        }

        let (head, mut rest) = match field.find('[') {
            Some(index) => field.split_at(index),
            None => (field, ""),
        };
        if head.is_empty() {
            return Err(MalformedFieldError::new(field, "missing top-level key"));
        }
        if head.contains(']') {
            return Err(MalformedFieldError::new(field, "unbalanced brackets"));
        }

        let mut segments = vec![head.to_string()];
        while !rest.is_empty() {
            let Some(inner) = rest.strip_prefix('[') else {
                return Err(MalformedFieldError::new(
                    field,
                    "unexpected characters after nested key",
                ));
            };
            let Some(end) = inner.find(']') else {
                return Err(MalformedFieldError::new(field, "unbalanced brackets"));
            };
            let segment = &inner[..end];
            if segment.contains('[') {
                return Err(MalformedFieldError::new(field, "unbalanced brackets"));
            }
            if segment.is_empty() {
                return Err(MalformedFieldError::new(field, "empty nested key"));
            }
            segments.push(segment.to_string());
            rest = &inner[end + 1..];
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// 顶层参数名。
    pub fn top_level(&self) -> &str {
        &self.segments[0]
    }

    /// 无方括号的顶层字段。
    pub fn is_top_level(&self) -> bool {
        self.segments.len() == 1
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (head, nested) = self.segments.split_first().ok_or(fmt::Error)?;
        f.write_str(head)?;
        for segment in nested {
            write!(f, "[{segment}]")?;
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = MalformedFieldError;

    fn from_str(field: &str) -> Result<Self, Self::Err> {
        Self::parse(field)
    }
}
