use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::errors::{KnowledgeError, KnowledgeResult};

pub const MARKDOWN_CONTENT_TYPE: &str = "text/markdown";

/// Lowercase hex SHA-256 of `bytes`.
pub fn compute_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown"))
}

/// MIME type guessed from the file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "md" | "markdown" => MARKDOWN_CONTENT_TYPE,
        "txt" => "text/plain",
        "json" => "application/json",
        "toml" => "application/toml",
        "yaml" | "yml" => "application/yaml",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `content` to `path` through a sibling temp file and a rename.
///
/// When `expected_checksum` is set the current file must exist and hash to
/// it, otherwise the write is refused with [`KnowledgeError::DirtyFile`] and
/// nothing on disk changes. Returns the checksum of the written bytes.
pub async fn write_file_atomic(
    path: &Path,
    content: &str,
    expected_checksum: Option<&str>,
) -> KnowledgeResult<String> {
    if let Some(expected) = expected_checksum {
        let actual = match tokio::fs::read(path).await {
            Ok(bytes) => compute_checksum(&bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };
        if actual != expected {
            return Err(KnowledgeError::DirtyFile {
                path: path.to_path_buf(),
                expected: expected.to_string(),
                actual,
            });
        }
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp_path = temp_path_for(path);
    tokio::fs::write(&tmp_path, content.as_bytes()).await?;
    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err.into());
    }

    Ok(compute_checksum(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn checksum_is_lowercase_sha256() {
        assert_eq!(
            compute_checksum(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for(Path::new("a/b.MD")), "text/markdown");
        assert_eq!(content_type_for(Path::new("img.png")), "image/png");
        assert_eq!(content_type_for(Path::new("blob")), "application/octet-stream");
    }

    #[tokio::test]
    async fn atomic_write_checks_expected_checksum() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("notes").join("a.md");

        let first = write_file_atomic(&path, "one", None).await.expect("write");
        assert_eq!(first, compute_checksum(b"one"));
        assert!(!temp_path_for(&path).exists());

        std::fs::write(&path, "edited elsewhere").expect("external edit");
        let err = write_file_atomic(&path, "two", Some(&first))
            .await
            .expect_err("stale checksum");
        assert!(matches!(err, KnowledgeError::DirtyFile { .. }));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "edited elsewhere");

        let current = compute_checksum(b"edited elsewhere");
        write_file_atomic(&path, "two", Some(&current))
            .await
            .expect("fresh checksum");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "two");
    }

    #[tokio::test]
    async fn expected_checksum_on_missing_file_is_dirty() {
        let dir = TempDir::new().expect("tempdir");
        let err = write_file_atomic(&dir.path().join("gone.md"), "x", Some("abc"))
            .await
            .expect_err("missing file");
        assert!(matches!(err, KnowledgeError::DirtyFile { .. }));
    }
}
