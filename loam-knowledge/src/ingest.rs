use std::path::Path;

use serde_json::{Map, Value};

use crate::files::{content_type_for, is_markdown};
use crate::models::Observation;
use crate::parser::{EntityMarkdown, ParsedRelation, parse_entity_bytes};
use crate::paths::generate_permalink;
use crate::storage::{EntityRecord, ts_from_millis};

pub const FILE_ENTITY_TYPE: &str = "file";

/// What the reconciler learned about one file on disk.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    /// `/`-separated path relative to the project root.
    pub file_path: String,
    pub checksum: String,
    pub mtime_ms: i64,
    pub size_bytes: i64,
}

/// A file turned into rows, ready to be persisted.
#[derive(Debug, Clone)]
pub struct IngestedFile {
    pub record: EntityRecord,
    /// Permalink came from front matter rather than from the path.
    pub explicit_permalink: bool,
    pub content: String,
    pub observations: Vec<Observation>,
    pub relations: Vec<ParsedRelation>,
}

pub fn ingest_file(project_id: i64, snapshot: &FileSnapshot, raw: &[u8]) -> IngestedFile {
    let path = Path::new(&snapshot.file_path);
    let timestamp = ts_from_millis(snapshot.mtime_ms);

    if !is_markdown(path) {
        let title = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| snapshot.file_path.clone());
        let content_type = content_type_for(path).to_string();
        let mut metadata = Map::new();
        metadata.insert("content_type".to_string(), Value::from(content_type.clone()));
        return IngestedFile {
            record: EntityRecord {
                project_id,
                title,
                entity_type: FILE_ENTITY_TYPE.to_string(),
                permalink: generate_permalink(&snapshot.file_path),
                file_path: snapshot.file_path.clone(),
                content_type,
                metadata: Value::Object(metadata),
                checksum: snapshot.checksum.clone(),
                mtime_ms: snapshot.mtime_ms,
                size_bytes: snapshot.size_bytes,
                created_at: timestamp,
                updated_at: timestamp,
            },
            explicit_permalink: false,
            content: String::new(),
            observations: Vec::new(),
            relations: Vec::new(),
        };
    }

    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parsed = parse_entity_bytes(raw, &stem);
    let explicit_permalink = parsed.permalink.is_some();
    let permalink = parsed
        .permalink
        .as_deref()
        .map(generate_permalink)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| generate_permalink(&snapshot.file_path));

    IngestedFile {
        record: EntityRecord {
            project_id,
            title: parsed.title.clone(),
            entity_type: parsed.entity_type.clone(),
            permalink,
            file_path: snapshot.file_path.clone(),
            content_type: content_type_for(path).to_string(),
            metadata: front_matter_json(&parsed),
            checksum: snapshot.checksum.clone(),
            mtime_ms: snapshot.mtime_ms,
            size_bytes: snapshot.size_bytes,
            created_at: timestamp,
            updated_at: timestamp,
        },
        explicit_permalink,
        content: parsed.content,
        observations: parsed.observations,
        relations: parsed.relations,
    }
}

/// Front matter as JSON with `tags` normalized to a list.
fn front_matter_json(parsed: &EntityMarkdown) -> Value {
    let mut map = match serde_json::to_value(&parsed.front_matter) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if parsed.tags.is_empty() {
        map.remove("tags");
    } else {
        map.insert("tags".to_string(), Value::from(parsed.tags.clone()));
    }
    Value::Object(map)
}
