//! Reconciliation of a project directory with the derived index.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::files::compute_checksum;
use crate::graph::resolve_relations;
use crate::ingest::{FileSnapshot, IngestedFile, ingest_file};
use crate::models::{ProjectContext, SyncFailure, SyncReport, SyncState};
use crate::paths::{is_temp_path, relative_file_path, resolve_under_root};
use crate::storage::{
    delete_entity, demote_incoming_relations, load_sync_states, move_entity, permalink_taken,
    persist_entity, unique_permalink,
};

/// Difference between the files on disk and the stored sync state.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Every eligible file currently on disk, by relative path.
    pub files: BTreeMap<String, FileSnapshot>,
    pub new: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    /// Vanished paths and the entity stored for them.
    pub deleted: BTreeMap<String, i64>,
    /// old path -> (new path, entity id)
    pub moves: BTreeMap<String, (String, i64)>,
    /// Entities whose file was touched without a content change:
    /// (entity id, mtime_ms, size_bytes).
    pub touched: Vec<(i64, i64, i64)>,
    pub errors: Vec<SyncFailure>,
}

struct ListedFile {
    path: PathBuf,
    mtime_ms: i64,
    size_bytes: i64,
}

/// Enumerate eligible files under `root`. Hidden paths and temp files are
/// skipped; unreadable entries are reported, not fatal.
async fn list_files(root: &Path) -> KnowledgeResult<(Vec<ListedFile>, Vec<SyncFailure>)> {
    let root = root.to_path_buf();
    let listed = tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        let mut errors = Vec::new();
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_name().to_string_lossy().starts_with('.')
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    errors.push(SyncFailure {
                        path,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() || is_temp_path(entry.path()) {
                continue;
            }
            match entry.metadata() {
                Ok(meta) => {
                    let mtime_ms = meta
                        .modified()
                        .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
                        .unwrap_or_default();
                    files.push(ListedFile {
                        path: entry.path().to_path_buf(),
                        mtime_ms,
                        size_bytes: meta.len() as i64,
                    });
                }
                Err(err) => errors.push(SyncFailure {
                    path: entry.path().display().to_string(),
                    reason: err.to_string(),
                }),
            }
        }
        (files, errors)
    })
    .await
    .map_err(|err| KnowledgeError::Io(std::io::Error::other(err)))?;
    Ok(listed)
}

/// Compare the project directory with what the index remembers.
pub async fn scan(
    conn: &mut SqliteConnection,
    project: &ProjectContext,
) -> KnowledgeResult<ScanOutcome> {
    tokio::fs::metadata(&project.root).await?;
    let states: HashMap<String, SyncState> = load_sync_states(conn, project.id)
        .await?
        .into_iter()
        .map(|state| (state.file_path.clone(), state))
        .collect();

    let (listed, errors) = list_files(&project.root).await?;
    let mut outcome = ScanOutcome {
        errors,
        ..ScanOutcome::default()
    };

    let mut candidates_new = Vec::new();
    for file in listed {
        let file_path = relative_file_path(&project.root, &file.path)?;
        let stored = states.get(&file_path);
        let checksum = match stored {
            Some(state) if state.mtime_ms == file.mtime_ms && state.size_bytes == file.size_bytes => {
                state.checksum.clone()
            }
            _ => match tokio::fs::read(&file.path).await {
                Ok(bytes) => compute_checksum(&bytes),
                Err(err) => {
                    warn!(path = %file_path, error = %err, "failed to read file");
                    outcome.errors.push(SyncFailure {
                        path: file_path,
                        reason: err.to_string(),
                    });
                    continue;
                }
            },
        };

        match stored {
            Some(state) if state.checksum != checksum => {
                outcome.modified.insert(file_path.clone());
            }
            Some(state) if state.mtime_ms != file.mtime_ms || state.size_bytes != file.size_bytes => {
                outcome
                    .touched
                    .push((state.entity_id, file.mtime_ms, file.size_bytes));
            }
            Some(_) => {}
            None => candidates_new.push(file_path.clone()),
        }

        outcome.files.insert(
            file_path.clone(),
            FileSnapshot {
                file_path,
                checksum,
                mtime_ms: file.mtime_ms,
                size_bytes: file.size_bytes,
            },
        );
    }

    let mut vanished: BTreeMap<String, &SyncState> = states
        .iter()
        .filter(|(path, _)| !outcome.files.contains_key(*path))
        .map(|(path, state)| (path.clone(), state))
        .collect();

    // A new path whose content matches a vanished path is a move.
    candidates_new.sort();
    for path in candidates_new {
        let checksum = &outcome.files[&path].checksum;
        let old = vanished
            .iter()
            .find(|(_, state)| &state.checksum == checksum)
            .map(|(old, state)| (old.clone(), state.entity_id));
        match old {
            Some((old_path, entity_id)) => {
                vanished.remove(&old_path);
                outcome.moves.insert(old_path, (path, entity_id));
            }
            None => {
                outcome.new.insert(path);
            }
        }
    }

    outcome.deleted = vanished
        .into_iter()
        .map(|(path, state)| (path, state.entity_id))
        .collect();

    Ok(outcome)
}

/// Bring the index in line with the project directory.
///
/// Order: deletions, moves, new and modified files (one transaction per
/// file, which also links that file's own relations), then one transaction
/// re-linking every relation of the project.
pub async fn sync_project(pool: &SqlitePool, project: &ProjectContext) -> KnowledgeResult<SyncReport> {
    let mut conn = pool.acquire().await?;
    let outcome = scan(&mut conn, project).await?;
    drop(conn);

    let mut report = SyncReport {
        errors: outcome.errors,
        ..SyncReport::default()
    };
    for (entity_id, mtime_ms, size_bytes) in &outcome.touched {
        sqlx::query("UPDATE entities SET mtime_ms = ?, size_bytes = ? WHERE id = ?")
            .bind(mtime_ms)
            .bind(size_bytes)
            .bind(entity_id)
            .execute(pool)
            .await?;
    }

    for (path, entity_id) in &outcome.deleted {
        let mut tx = pool.begin().await?;
        remove_entity(&mut tx, project.id, *entity_id).await?;
        tx.commit().await?;
        debug!(path = %path, entity_id, "entity deleted");
        report.deleted.insert(path.clone());
    }

    for (old_path, (new_path, entity_id)) in &outcome.moves {
        let snapshot = &outcome.files[new_path];
        let result = async {
            let ingested = read_and_ingest(project, snapshot).await?;
            let mut tx = pool.begin().await?;
            let ingested = assign_permalink(&mut tx, ingested, Some(*entity_id)).await?;
            move_entity(
                &mut tx,
                *entity_id,
                new_path,
                &ingested.record.permalink,
                snapshot.mtime_ms,
            )
            .await?;
            persist_ingested(&mut tx, &ingested).await?;
            tx.commit().await?;
            Ok::<(), KnowledgeError>(())
        }
        .await;

        match result {
            Ok(()) => {
                debug!(from = %old_path, to = %new_path, "entity moved");
                report.moves.insert(old_path.clone(), new_path.clone());
                report
                    .checksums
                    .insert(new_path.clone(), snapshot.checksum.clone());
            }
            Err(err) => record_failure(&mut report, new_path, err),
        }
    }

    let changed = outcome
        .new
        .iter()
        .map(|p| (p, true))
        .chain(outcome.modified.iter().map(|p| (p, false)));
    let mut ordered: Vec<(&String, bool)> = changed.collect();
    ordered.sort();

    for (path, is_new) in ordered {
        let snapshot = &outcome.files[path];
        let result = async {
            let ingested = read_and_ingest(project, snapshot).await?;
            let mut tx = pool.begin().await?;
            let ingested = assign_permalink(&mut tx, ingested, None).await?;
            persist_ingested(&mut tx, &ingested).await?;
            tx.commit().await?;
            Ok::<(), KnowledgeError>(())
        }
        .await;

        match result {
            Ok(()) => {
                if is_new {
                    report.new.insert(path.clone());
                } else {
                    report.modified.insert(path.clone());
                }
                report.checksums.insert(path.clone(), snapshot.checksum.clone());
            }
            Err(err) => record_failure(&mut report, path, err),
        }
    }

    if !report.is_empty() {
        let mut tx = pool.begin().await?;
        resolve_relations(&mut tx, project.id, None).await?;
        tx.commit().await?;
    }

    if report.is_empty() {
        debug!(project = %project.name, "sync found no changes");
    } else {
        info!(
            project = %project.name,
            new = report.new.len(),
            modified = report.modified.len(),
            deleted = report.deleted.len(),
            moved = report.moves.len(),
            errors = report.errors.len(),
            skipped = report.skipped.len(),
            "sync complete"
        );
    }
    Ok(report)
}

/// Persist one file outside of a scan (the note writer uses this), then
/// re-link the project in the same transaction.
pub async fn sync_file(
    pool: &SqlitePool,
    project: &ProjectContext,
    file_path: &str,
) -> KnowledgeResult<i64> {
    let absolute = resolve_under_root(&project.root, file_path)?;
    let bytes = tokio::fs::read(&absolute).await?;
    let meta = tokio::fs::metadata(&absolute).await?;
    let snapshot = FileSnapshot {
        file_path: file_path.to_string(),
        checksum: compute_checksum(&bytes),
        mtime_ms: meta
            .modified()
            .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
            .unwrap_or_default(),
        size_bytes: meta.len() as i64,
    };
    let ingested = ingest_file(project.id, &snapshot, &bytes);

    let mut tx = pool.begin().await?;
    let ingested = assign_permalink(&mut tx, ingested, None).await?;
    let entity_id = persist_ingested(&mut tx, &ingested).await?;
    resolve_relations(&mut tx, project.id, None).await?;
    tx.commit().await?;
    Ok(entity_id)
}

/// Drop an entity whose file is gone. Relations other files hold towards it
/// fall back to their names first, since those edges still exist on disk,
/// and are then re-linked against the remaining entities.
pub(crate) async fn remove_entity(
    conn: &mut SqliteConnection,
    project_id: i64,
    entity_id: i64,
) -> KnowledgeResult<bool> {
    let sources = demote_incoming_relations(conn, &[entity_id]).await?;
    let deleted = delete_entity(conn, entity_id).await?;
    for source in sources.into_iter().filter(|id| *id != entity_id) {
        resolve_relations(conn, project_id, Some(source)).await?;
        crate::search::index_relations_from(conn, source).await?;
    }
    Ok(deleted)
}

async fn read_and_ingest(
    project: &ProjectContext,
    snapshot: &FileSnapshot,
) -> KnowledgeResult<IngestedFile> {
    let absolute = resolve_under_root(&project.root, &snapshot.file_path)?;
    let bytes = tokio::fs::read(&absolute).await?;
    let mut snapshot = snapshot.clone();
    let checksum = compute_checksum(&bytes);
    if checksum != snapshot.checksum {
        // Changed again since the scan; index what is on disk now.
        snapshot.checksum = checksum;
        snapshot.size_bytes = bytes.len() as i64;
    }
    Ok(ingest_file(project.id, &snapshot, &bytes))
}

/// Derived permalinks get a `-N` suffix when taken by another file; an
/// explicit permalink that is taken is an integrity violation. `moving` is
/// the entity being moved onto this path, which may keep its own permalink.
async fn assign_permalink(
    conn: &mut SqliteConnection,
    mut ingested: IngestedFile,
    moving: Option<i64>,
) -> KnowledgeResult<IngestedFile> {
    let record = &ingested.record;
    if !permalink_taken(conn, record.project_id, &record.permalink, &record.file_path, moving).await? {
        return Ok(ingested);
    }
    if ingested.explicit_permalink {
        return Err(KnowledgeError::Integrity(format!(
            "permalink '{}' of {} is already used by another file",
            record.permalink, record.file_path
        )));
    }

    let permalink = unique_permalink(
        conn,
        record.project_id,
        &record.permalink,
        &record.file_path,
        moving,
    )
    .await?;
    ingested.record.permalink = permalink;
    Ok(ingested)
}

/// Write one file's entity and link its outgoing relations to whatever is
/// stored already, so readers never see them half-resolved.
async fn persist_ingested(
    conn: &mut SqliteConnection,
    ingested: &IngestedFile,
) -> KnowledgeResult<i64> {
    let entity = persist_entity(
        conn,
        &ingested.record,
        &ingested.content,
        &ingested.observations,
        &ingested.relations,
    )
    .await?;
    resolve_relations(conn, ingested.record.project_id, Some(entity.id)).await?;
    Ok(entity.id)
}

fn record_failure(report: &mut SyncReport, path: &str, err: KnowledgeError) {
    let failure = SyncFailure {
        path: path.to_string(),
        reason: err.to_string(),
    };
    if err.is_integrity() {
        warn!(path = %path, error = %err, "file skipped");
        report.skipped.push(failure);
    } else {
        warn!(path = %path, error = %err, "failed to index file");
        report.errors.push(failure);
    }
}
