use crate::errors::{ToolError, Violation};
use crate::services::transport::AttachmentPayload;
use bytes::Bytes;
use std::path::Path;

/// Reads local files into attachment payloads before any network call.
#[derive(Debug, Clone)]
pub struct AttachmentLoader {
    max_bytes: u64,
}

impl AttachmentLoader {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub async fn load(&self, field: &str, file_path: &str) -> Result<AttachmentPayload, ToolError> {
        let invalid = |problem: String| ToolError::validation(field, vec![Violation::new(field, problem)]);
        let trimmed = file_path.trim();
        if trimmed.is_empty() {
            return Err(invalid("file path is empty".to_string()));
        }
        let path = Path::new(trimmed);
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|err| invalid(format!("cannot read '{}': {}", trimmed, err)))?;
        if !metadata.is_file() {
            return Err(invalid(format!("'{}' is not a regular file", trimmed)));
        }
        if metadata.len() > self.max_bytes {
            return Err(invalid(format!(
                "'{}' is {} bytes, above the {} byte upload limit",
                trimmed,
                metadata.len(),
                self.max_bytes
            )));
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| invalid(format!("cannot read '{}': {}", trimmed, err)))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(AttachmentPayload {
            file_name,
            content_type,
            bytes: Bytes::from(bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ToolErrorKind;

    #[tokio::test]
    async fn loads_name_type_and_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").expect("write");

        let payload = AttachmentLoader::new(1024)
            .load("file_path", path.to_str().expect("utf8 path"))
            .await
            .expect("load");
        assert_eq!(payload.file_name, "notes.txt");
        assert_eq!(payload.content_type, "text/plain");
        assert_eq!(payload.bytes.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn unknown_extensions_fall_back_to_octet_stream() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob.zzunknown");
        std::fs::write(&path, b"\x00\x01").expect("write");
        let payload = AttachmentLoader::new(1024)
            .load("file_path", path.to_str().expect("utf8 path"))
            .await
            .expect("load");
        assert_eq!(payload.content_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn missing_and_oversized_files_are_validation_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.pdf");
        let err = AttachmentLoader::new(1024)
            .load("file_path", missing.to_str().expect("utf8 path"))
            .await
            .expect_err("missing file");
        assert_eq!(err.kind, ToolErrorKind::InvalidParams);
        assert_eq!(err.violations()[0].field, "file_path");

        let big = dir.path().join("big.bin");
        std::fs::write(&big, vec![0u8; 16]).expect("write");
        let err = AttachmentLoader::new(8)
            .load("file_path", big.to_str().expect("utf8 path"))
            .await
            .expect_err("too large");
        assert_eq!(err.kind, ToolErrorKind::InvalidParams);
    }
}
