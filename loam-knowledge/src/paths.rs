use std::path::{Component, Path, PathBuf};

use crate::KnowledgeSettings;
use crate::errors::{KnowledgeError, KnowledgeResult};

pub const DB_FILE_NAME: &str = "index.sqlite3";
pub const WATCH_STATUS_FILE_NAME: &str = "watch-status.json";

pub fn data_root(settings: &KnowledgeSettings) -> KnowledgeResult<PathBuf> {
    if let Some(path) = &settings.data_root_override {
        return Ok(path.clone());
    }
    if let Ok(override_dir) = std::env::var("LOAM_DATA_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let dir = dirs::data_dir().ok_or(KnowledgeError::MissingDataDir)?;
    Ok(dir.join("loam"))
}

pub fn knowledge_db_path(settings: &KnowledgeSettings) -> KnowledgeResult<PathBuf> {
    if let Some(path) = &settings.knowledge_db_path_override {
        return Ok(path.clone());
    }
    Ok(data_root(settings)?.join(DB_FILE_NAME))
}

pub fn watch_status_path(settings: &KnowledgeSettings) -> KnowledgeResult<PathBuf> {
    if let Some(path) = &settings.watch_status_path_override {
        return Ok(path.clone());
    }
    Ok(data_root(settings)?.join(WATCH_STATUS_FILE_NAME))
}

/// True when any component of `relative` starts with a dot.
pub fn is_hidden_path(relative: &Path) -> bool {
    relative.components().any(|component| match component {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

/// Leftovers of an interrupted atomic write.
pub fn is_temp_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "tmp")
}

/// Whether the reconciler should look at this path at all.
pub fn is_eligible(root: &Path, path: &Path) -> bool {
    match path.strip_prefix(root) {
        Ok(relative) => !is_hidden_path(relative) && !is_temp_path(path),
        Err(_) => false,
    }
}

/// `/`-separated path of `path` relative to `root`.
pub fn relative_file_path(root: &Path, path: &Path) -> KnowledgeResult<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| KnowledgeError::PathOutsideRoot(path.to_path_buf()))?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(parts.join("/"))
}

/// Join a `/`-separated relative path onto `root`, refusing anything that
/// would escape it.
pub fn resolve_under_root(root: &Path, relative: &str) -> KnowledgeResult<PathBuf> {
    let mut out = root.to_path_buf();
    for part in relative.split('/').filter(|p| !p.is_empty() && *p != ".") {
        if part == ".." || Path::new(part).is_absolute() {
            return Err(KnowledgeError::PathOutsideRoot(PathBuf::from(relative)));
        }
        out.push(part);
    }
    Ok(out)
}

/// URL-safe identifier derived from a path or title.
///
/// `"test/Test Note.md"` becomes `"test/test-note"`.
pub fn generate_permalink(path_or_title: &str) -> String {
    let normalized = path_or_title.replace('\\', "/");
    let without_ext = normalized
        .strip_suffix(".md")
        .or_else(|| normalized.strip_suffix(".MD"))
        .unwrap_or(&normalized);

    without_ext
        .split('/')
        .map(slug_segment)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn slug_segment(segment: &str) -> String {
    let mut slug = String::with_capacity(segment.len());
    let mut pending_dash = false;
    for ch in segment.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}
