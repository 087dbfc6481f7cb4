use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};

use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::models::{DEFAULT_OBSERVATION_CATEGORY, Entity, Observation, Project, SyncState};
use crate::parser::ParsedRelation;
use crate::paths::generate_permalink;
use crate::search;

#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    pool: SqlitePool,
}

impl KnowledgeStore {
    pub async fn open(db_path: &Path) -> KnowledgeResult<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA journal_mode = WAL")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA synchronous = NORMAL")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA busy_timeout = 5000")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn run_migrations(pool: &SqlitePool) -> KnowledgeResult<()> {
    sqlx::migrate!("./migrations/knowledge").run(pool).await?;
    Ok(())
}

/// Timestamps are stored as RFC 3339 UTC with millisecond precision so that
/// string comparison orders them.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

pub fn ts_from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

// ── Projects ─────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct ProjectRow {
    id: i64,
    name: String,
    permalink: String,
    path: String,
    is_active: i64,
    is_default: i64,
    created_at: String,
    updated_at: String,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: row.id,
            name: row.name,
            permalink: row.permalink,
            path: PathBuf::from(row.path),
            is_active: row.is_active != 0,
            is_default: row.is_default != 0,
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

const PROJECT_COLUMNS: &str =
    "id, name, permalink, path, is_active, is_default, created_at, updated_at";

/// Create the project or update its root path.
pub async fn ensure_project(
    conn: &mut SqliteConnection,
    name: &str,
    root: &Path,
) -> KnowledgeResult<Project> {
    let now = format_ts(Utc::now());
    let permalink = generate_permalink(name);
    let sql = format!(
        r#"INSERT INTO projects (name, permalink, path, is_active, is_default, created_at, updated_at)
           VALUES (?, ?, ?, 1, 0, ?, ?)
           ON CONFLICT(name) DO UPDATE SET
               path = excluded.path,
               is_active = 1,
               updated_at = CASE WHEN projects.path = excluded.path
                                 THEN projects.updated_at ELSE excluded.updated_at END
           RETURNING {PROJECT_COLUMNS}"#
    );
    let row: ProjectRow = sqlx::query_as(&sql)
        .bind(name)
        .bind(&permalink)
        .bind(root.to_string_lossy().to_string())
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| KnowledgeError::from_write(err, "project"))?;
    Ok(row.into())
}

pub async fn get_project(
    conn: &mut SqliteConnection,
    name: &str,
) -> KnowledgeResult<Option<Project>> {
    let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE name = ? OR permalink = ? LIMIT 1");
    let row: Option<ProjectRow> = sqlx::query_as(&sql)
        .bind(name)
        .bind(generate_permalink(name))
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(Project::from))
}

pub async fn list_projects(conn: &mut SqliteConnection) -> KnowledgeResult<Vec<Project>> {
    let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY name");
    let rows: Vec<ProjectRow> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    Ok(rows.into_iter().map(Project::from).collect())
}

pub async fn default_project(conn: &mut SqliteConnection) -> KnowledgeResult<Option<Project>> {
    let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE is_default = 1 ORDER BY id LIMIT 1");
    let row: Option<ProjectRow> = sqlx::query_as(&sql).fetch_optional(&mut *conn).await?;
    Ok(row.map(Project::from))
}

/// Make `name` the only default project. Returns false when no such project
/// exists, in which case nothing changes.
pub async fn set_default_project(pool: &SqlitePool, name: &str) -> KnowledgeResult<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE projects SET is_default = 0 WHERE is_default != 0")
        .execute(&mut *tx)
        .await?;
    let updated = sqlx::query("UPDATE projects SET is_default = 1 WHERE name = ?")
        .bind(name)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if updated == 0 {
        tx.rollback().await?;
        return Ok(false);
    }
    tx.commit().await?;
    Ok(true)
}

// ── Entities ─────────────────────────────────────────────────────────

/// Everything needed to write one entity row.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub project_id: i64,
    pub title: String,
    pub entity_type: String,
    pub permalink: String,
    pub file_path: String,
    pub content_type: String,
    pub metadata: serde_json::Value,
    pub checksum: String,
    pub mtime_ms: i64,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntityRow {
    id: i64,
    project_id: i64,
    title: String,
    entity_type: String,
    permalink: String,
    file_path: String,
    content_type: String,
    metadata_json: Option<String>,
    checksum: String,
    created_at: String,
    updated_at: String,
}

impl From<EntityRow> for Entity {
    fn from(row: EntityRow) -> Self {
        let metadata = row
            .metadata_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        Entity {
            id: row.id,
            project_id: row.project_id,
            title: row.title,
            entity_type: row.entity_type,
            permalink: row.permalink,
            file_path: row.file_path,
            content_type: row.content_type,
            metadata,
            checksum: row.checksum,
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

pub(crate) const ENTITY_COLUMNS: &str = "id, project_id, title, entity_type, permalink, file_path, \
     content_type, metadata_json, checksum, created_at, updated_at";

/// Insert or update the entity stored for `record.file_path`. `created_at`
/// of an existing row is kept.
pub async fn upsert_entity(
    conn: &mut SqliteConnection,
    record: &EntityRecord,
) -> KnowledgeResult<Entity> {
    let sql = format!(
        r#"INSERT INTO entities (
               project_id, title, entity_type, permalink, file_path, content_type,
               metadata_json, checksum, mtime_ms, size_bytes, created_at, updated_at
           ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(project_id, file_path) DO UPDATE SET
               title = excluded.title,
               entity_type = excluded.entity_type,
               permalink = excluded.permalink,
               content_type = excluded.content_type,
               metadata_json = excluded.metadata_json,
               checksum = excluded.checksum,
               mtime_ms = excluded.mtime_ms,
               size_bytes = excluded.size_bytes,
               updated_at = excluded.updated_at
           RETURNING {ENTITY_COLUMNS}"#
    );
    let row: EntityRow = sqlx::query_as(&sql)
        .bind(record.project_id)
        .bind(&record.title)
        .bind(&record.entity_type)
        .bind(&record.permalink)
        .bind(&record.file_path)
        .bind(&record.content_type)
        .bind(serde_json::to_string(&record.metadata)?)
        .bind(&record.checksum)
        .bind(record.mtime_ms)
        .bind(record.size_bytes)
        .bind(format_ts(record.created_at))
        .bind(format_ts(record.updated_at))
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| KnowledgeError::from_write(err, &record.file_path))?;
    Ok(row.into())
}

pub async fn replace_observations(
    conn: &mut SqliteConnection,
    entity_id: i64,
    observations: &[Observation],
) -> KnowledgeResult<()> {
    sqlx::query("DELETE FROM observations WHERE entity_id = ?")
        .bind(entity_id)
        .execute(&mut *conn)
        .await?;

    for (position, observation) in observations.iter().enumerate() {
        let category = match observation.category.trim() {
            "" => DEFAULT_OBSERVATION_CATEGORY,
            category => category,
        };
        sqlx::query(
            r#"INSERT INTO observations (entity_id, position, category, content, tags_json, context)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entity_id)
        .bind(position as i64)
        .bind(category)
        .bind(&observation.content)
        .bind(serde_json::to_string(&observation.tags)?)
        .bind(&observation.context)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Replace outgoing relations. Every new row starts unresolved; callers
/// link them before committing.
pub async fn replace_relations(
    conn: &mut SqliteConnection,
    entity_id: i64,
    relations: &[ParsedRelation],
) -> KnowledgeResult<()> {
    sqlx::query("DELETE FROM relations WHERE from_id = ?")
        .bind(entity_id)
        .execute(&mut *conn)
        .await?;

    for relation in relations {
        sqlx::query(
            r#"INSERT OR IGNORE INTO relations (from_id, to_id, to_name, relation_type, context)
               VALUES (?, NULL, ?, ?, ?)"#,
        )
        .bind(entity_id)
        .bind(&relation.target)
        .bind(&relation.relation_type)
        .bind(&relation.context)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Write an entity with its observations and relations and refresh the
/// matching search rows. Callers run this inside one transaction per file.
pub async fn persist_entity(
    conn: &mut SqliteConnection,
    record: &EntityRecord,
    content: &str,
    observations: &[Observation],
    relations: &[ParsedRelation],
) -> KnowledgeResult<Entity> {
    let entity = upsert_entity(conn, record).await?;
    replace_observations(conn, entity.id, observations).await?;
    replace_relations(conn, entity.id, relations).await?;
    search::index_entity(conn, &entity, content).await?;
    search::index_relations_from(conn, entity.id).await?;
    Ok(entity)
}

/// Point every relation that targets one of `entity_ids` (from an entity
/// outside the set) back at its name. Returns the affected source ids.
pub async fn demote_incoming_relations(
    conn: &mut SqliteConnection,
    entity_ids: &[i64],
) -> KnowledgeResult<Vec<i64>> {
    if entity_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = placeholders(entity_ids.len());
    let select = format!(
        "SELECT DISTINCT from_id FROM relations WHERE to_id IN ({placeholders}) ORDER BY from_id"
    );
    let mut query = sqlx::query_as::<_, (i64,)>(&select);
    for id in entity_ids {
        query = query.bind(id);
    }
    let sources: Vec<i64> = query
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|(id,)| id)
        .collect();

    let update = format!("UPDATE relations SET to_id = NULL WHERE to_id IN ({placeholders})");
    let mut query = sqlx::query(&update);
    for id in entity_ids {
        query = query.bind(id);
    }
    query.execute(&mut *conn).await?;

    Ok(sources)
}

/// Remove an entity, its observations and every relation it is part of,
/// together with their search rows.
pub async fn delete_entity(conn: &mut SqliteConnection, entity_id: i64) -> KnowledgeResult<bool> {
    let sources: Vec<(i64,)> = sqlx::query_as(
        "SELECT DISTINCT from_id FROM relations WHERE to_id = ? AND from_id != ?",
    )
    .bind(entity_id)
    .bind(entity_id)
    .fetch_all(&mut *conn)
    .await?;

    search::remove_entity_rows(conn, entity_id).await?;
    let deleted = sqlx::query("DELETE FROM entities WHERE id = ?")
        .bind(entity_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    for (source,) in sources {
        search::index_relations_from(conn, source).await?;
    }
    Ok(deleted > 0)
}

/// Change the path (and derived permalink) of an entity in place.
pub async fn move_entity(
    conn: &mut SqliteConnection,
    entity_id: i64,
    file_path: &str,
    permalink: &str,
    mtime_ms: i64,
) -> KnowledgeResult<Option<Entity>> {
    let sql = format!(
        r#"UPDATE entities SET file_path = ?, permalink = ?, mtime_ms = ?
           WHERE id = ?
           RETURNING {ENTITY_COLUMNS}"#
    );
    let row: Option<EntityRow> = sqlx::query_as(&sql)
        .bind(file_path)
        .bind(permalink)
        .bind(mtime_ms)
        .bind(entity_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| KnowledgeError::from_write(err, file_path))?;

    let Some(entity) = row.map(Entity::from) else {
        return Ok(None);
    };
    search::refresh_entity_location(conn, &entity).await?;
    search::index_relations_from(conn, entity.id).await?;
    let sources: Vec<(i64,)> = sqlx::query_as(
        "SELECT DISTINCT from_id FROM relations WHERE to_id = ? AND from_id != ?",
    )
    .bind(entity.id)
    .bind(entity.id)
    .fetch_all(&mut *conn)
    .await?;
    for (source,) in sources {
        search::index_relations_from(conn, source).await?;
    }
    Ok(Some(entity))
}

pub async fn load_sync_states(
    conn: &mut SqliteConnection,
    project_id: i64,
) -> KnowledgeResult<Vec<SyncState>> {
    let rows: Vec<(i64, String, String, i64, i64, String)> = sqlx::query_as(
        r#"SELECT id, file_path, checksum, mtime_ms, size_bytes, permalink
           FROM entities WHERE project_id = ? ORDER BY file_path"#,
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(entity_id, file_path, checksum, mtime_ms, size_bytes, permalink)| SyncState {
                entity_id,
                file_path,
                checksum,
                mtime_ms,
                size_bytes,
                permalink,
            },
        )
        .collect())
}

/// Whether another entity (not stored at `except_file`, not `except_id`)
/// already uses `permalink`.
pub async fn permalink_taken(
    conn: &mut SqliteConnection,
    project_id: i64,
    permalink: &str,
    except_file: &str,
    except_id: Option<i64>,
) -> KnowledgeResult<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"SELECT id FROM entities
           WHERE project_id = ? AND permalink = ? AND file_path != ? AND id != ?
           LIMIT 1"#,
    )
    .bind(project_id)
    .bind(permalink)
    .bind(except_file)
    .bind(except_id.unwrap_or(-1))
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.is_some())
}

/// `base`, or the first free `base-N`, for the file at `file_path`.
pub async fn unique_permalink(
    conn: &mut SqliteConnection,
    project_id: i64,
    base: &str,
    file_path: &str,
    except_id: Option<i64>,
) -> KnowledgeResult<String> {
    if !permalink_taken(conn, project_id, base, file_path, except_id).await? {
        return Ok(base.to_string());
    }
    let mut suffix = 1;
    loop {
        let candidate = format!("{base}-{suffix}");
        if !permalink_taken(conn, project_id, &candidate, file_path, except_id).await? {
            return Ok(candidate);
        }
        suffix += 1;
    }
}

pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
