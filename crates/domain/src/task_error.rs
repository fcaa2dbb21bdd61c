//! 任务/子任务业务错误的结构化表示及其存储编码
//!
//! 执行器上报的失败以 JSON 字节存储在 `error` 列中。读取时若字节无法解析，
//! 退化为以原始文本为消息的普通错误，而不是让整行读取失败。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// 无法识别来源的错误使用的分类
pub const UNKNOWN_ERROR_CLASS: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub class: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl TaskError {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    /// 由任意错误的文本描述构造
    pub fn normalize(err: impl fmt::Display) -> Self {
        Self::new(UNKNOWN_ERROR_CLASS, err.to_string())
    }

    /// 存储内容无法解析时的退化形式
    pub fn plain(message: impl Into<String>) -> Self {
        Self::new("", message)
    }

    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.class.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "[{}] {}", self.class, self.message)
        }
    }
}

impl std::error::Error for TaskError {}

/// 序列化为可存储的字节，`None` 对应 SQL NULL
pub fn serialize_err(err: Option<&TaskError>) -> Option<Vec<u8>> {
    let err = err?;
    match serde_json::to_vec(err) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!("序列化任务错误失败: {e}");
            None
        }
    }
}

/// 空字节视为没有错误
pub fn deserialize_err(bytes: &[u8]) -> Option<TaskError> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice::<TaskError>(bytes) {
        Ok(err) => Some(err),
        Err(e) => {
            warn!("反序列化任务错误失败, 退化为普通文本: {e}");
            Some(TaskError::plain(String::from_utf8_lossy(bytes)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_none_is_null() {
        assert!(serialize_err(None).is_none());
    }

    #[test]
    fn test_structured_error_survives_storage() {
        let err = TaskError::new("ErrLoadDataInvalidURI", "invalid uri")
            .with_field("uri", serde_json::json!("s3://bucket"));
        let bytes = serialize_err(Some(&err)).unwrap();
        assert_eq!(deserialize_err(&bytes), Some(err));
    }

    #[test]
    fn test_malformed_bytes_degrade_to_plain_text() {
        let err = deserialize_err(b"disk full").unwrap();
        assert_eq!(err.class, "");
        assert_eq!(err.message, "disk full");
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn test_empty_bytes_mean_no_error() {
        assert!(deserialize_err(b"").is_none());
    }

    #[test]
    fn test_normalize_uses_display() {
        let err = TaskError::normalize("connection reset");
        assert_eq!(err.class, UNKNOWN_ERROR_CLASS);
        assert_eq!(err.to_string(), "[unknown] connection reset");
    }
}
