use serde_yaml::Mapping;
use tracing::{debug, info};

use super::KnowledgeEngine;
use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::files::write_file_atomic;
use crate::graph::{entity_by_id, observations_for_entity, relations_from, relations_to};
use crate::index::{remove_entity, sync_file};
use crate::models::{
    EntitySummary, NoteDocument, NoteWriteRequest, NoteWriteResult, ProjectContext,
};
use crate::parser::{DEFAULT_ENTITY_TYPE, EntityMarkdown, format_entity_markdown};
use crate::paths::{generate_permalink, resolve_under_root};
use crate::resolver::LinkResolver;
use crate::storage::{permalink_taken, unique_permalink};

pub(crate) async fn write_note(
    engine: &KnowledgeEngine,
    project: &ProjectContext,
    request: NoteWriteRequest,
) -> KnowledgeResult<NoteWriteResult> {
    let gate = engine.pass_gate(project.id);
    let _pass = gate.lock().await;

    let file_path = note_file_path(&request.folder, &request.title);
    let absolute = resolve_under_root(&project.root, &file_path)?;
    let created = !tokio::fs::try_exists(&absolute).await?;

    let permalink = {
        let mut conn = engine.pool().acquire().await?;
        match request.permalink.as_deref().map(generate_permalink) {
            Some(explicit) if !explicit.is_empty() => {
                if permalink_taken(&mut conn, project.id, &explicit, &file_path, None).await? {
                    return Err(KnowledgeError::Integrity(format!(
                        "permalink '{explicit}' is already used by another file"
                    )));
                }
                explicit
            }
            _ => {
                let derived = generate_permalink(&file_path);
                unique_permalink(&mut conn, project.id, &derived, &file_path, None).await?
            }
        }
    };

    let mut document = EntityMarkdown::new(request.title.clone(), request.content.clone());
    document.entity_type = request
        .entity_type
        .clone()
        .unwrap_or_else(|| DEFAULT_ENTITY_TYPE.to_string());
    document.permalink = Some(permalink);
    document.tags = request.tags.clone();
    document.front_matter = metadata_mapping(&request.metadata)?;
    let markdown = format_entity_markdown(&document);

    let checksum =
        write_file_atomic(&absolute, &markdown, request.expected_checksum.as_deref()).await?;
    let entity_id = sync_file(engine.pool(), project, &file_path).await?;

    let mut conn = engine.pool().acquire().await?;
    let entity = entity_by_id(&mut conn, entity_id)
        .await?
        .ok_or_else(|| KnowledgeError::Integrity(format!("{file_path} vanished after write")))?;

    info!(project = %project.name, path = %file_path, created, "note written");
    Ok(NoteWriteResult {
        entity: EntitySummary::from(&entity),
        file_path,
        checksum,
        created,
    })
}

pub(crate) async fn read_note(
    engine: &KnowledgeEngine,
    project: &ProjectContext,
    identifier: &str,
) -> KnowledgeResult<Option<NoteDocument>> {
    let mut tx = engine.pool().begin().await?;
    let Some(entity) = LinkResolver::resolve_in_tx(&mut tx, project.id, identifier, false).await?
    else {
        return Ok(None);
    };
    let observations = observations_for_entity(&mut tx, entity.id).await?;
    let relations = relations_from(&mut tx, entity.id).await?;
    let backlinks = relations_to(&mut tx, entity.id).await?;
    tx.commit().await?;

    let absolute = resolve_under_root(&project.root, &entity.file_path)?;
    let bytes = match tokio::fs::read(&absolute).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %entity.file_path, "indexed file missing on disk");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };

    Ok(Some(NoteDocument {
        entity,
        observations,
        relations,
        backlinks,
        content: String::from_utf8_lossy(&bytes).into_owned(),
    }))
}

pub(crate) async fn delete_note(
    engine: &KnowledgeEngine,
    project: &ProjectContext,
    identifier: &str,
) -> KnowledgeResult<bool> {
    let gate = engine.pass_gate(project.id);
    let _pass = gate.lock().await;

    let mut tx = engine.pool().begin().await?;
    let Some(entity) = LinkResolver::resolve_in_tx(&mut tx, project.id, identifier, true).await?
    else {
        return Ok(false);
    };

    let absolute = resolve_under_root(&project.root, &entity.file_path)?;
    match tokio::fs::remove_file(&absolute).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    let deleted = remove_entity(&mut tx, project.id, entity.id).await?;
    tx.commit().await?;
    info!(project = %project.name, path = %entity.file_path, "note deleted");
    Ok(deleted)
}

/// `{folder}/{title}.md`, with characters that cannot appear in a file
/// name replaced.
pub(crate) fn note_file_path(folder: &str, title: &str) -> String {
    let file_name = format!("{}.md", sanitize_filename(title));
    let folder: Vec<&str> = folder
        .split(['/', '\\'])
        .map(str::trim)
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    if folder.is_empty() {
        file_name
    } else {
        format!("{}/{file_name}", folder.join("/"))
    }
}

/// Sanitize a title for use as a filename.
pub(crate) fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

fn metadata_mapping(
    metadata: &serde_json::Map<String, serde_json::Value>,
) -> KnowledgeResult<Mapping> {
    match serde_yaml::to_value(metadata)? {
        serde_yaml::Value::Mapping(mapping) => Ok(mapping),
        _ => Ok(Mapping::new()),
    }
}
