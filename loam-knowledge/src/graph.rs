use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::errors::KnowledgeResult;
use crate::models::{
    Entity, ObservationSummary, RelatedResult, Relation, RelationTarget, SearchItemType,
};
use crate::resolver::LinkResolver;
use crate::search;
use crate::storage::{ENTITY_COLUMNS, EntityRow, parse_ts, placeholders};

pub async fn entity_by_id(
    conn: &mut SqliteConnection,
    entity_id: i64,
) -> KnowledgeResult<Option<Entity>> {
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?");
    let row: Option<EntityRow> = sqlx::query_as(&sql)
        .bind(entity_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(Entity::from))
}

pub async fn entity_by_permalink(
    conn: &mut SqliteConnection,
    project_id: i64,
    permalink: &str,
) -> KnowledgeResult<Option<Entity>> {
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE project_id = ? AND permalink = ?");
    let row: Option<EntityRow> = sqlx::query_as(&sql)
        .bind(project_id)
        .bind(permalink)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(Entity::from))
}

/// Titles are not unique; the oldest entity wins.
pub async fn entity_by_title(
    conn: &mut SqliteConnection,
    project_id: i64,
    title: &str,
) -> KnowledgeResult<Option<Entity>> {
    let sql = format!(
        "SELECT {ENTITY_COLUMNS} FROM entities WHERE project_id = ? AND title = ? ORDER BY id LIMIT 1"
    );
    let row: Option<EntityRow> = sqlx::query_as(&sql)
        .bind(project_id)
        .bind(title)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(Entity::from))
}

pub async fn entity_by_file_path(
    conn: &mut SqliteConnection,
    project_id: i64,
    file_path: &str,
) -> KnowledgeResult<Option<Entity>> {
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE project_id = ? AND file_path = ?");
    let row: Option<EntityRow> = sqlx::query_as(&sql)
        .bind(project_id)
        .bind(file_path)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(Entity::from))
}

pub async fn entities_by_ids(
    conn: &mut SqliteConnection,
    ids: &[i64],
) -> KnowledgeResult<Vec<Entity>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {ENTITY_COLUMNS} FROM entities WHERE id IN ({}) ORDER BY id",
        placeholders(ids.len())
    );
    let mut query = sqlx::query_as::<_, EntityRow>(&sql);
    for id in ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(&mut *conn).await?;
    Ok(rows.into_iter().map(Entity::from).collect())
}

#[derive(Debug, sqlx::FromRow)]
struct ObservationRow {
    id: i64,
    entity_id: i64,
    category: String,
    content: String,
    tags_json: Option<String>,
    context: Option<String>,
    title: String,
    permalink: String,
    file_path: String,
    created_at: String,
}

impl From<ObservationRow> for ObservationSummary {
    fn from(row: ObservationRow) -> Self {
        let permalink = search::observation_permalink(&row.permalink, &row.category, &row.content);
        ObservationSummary {
            id: row.id,
            entity_id: row.entity_id,
            title: row.title,
            permalink,
            file_path: row.file_path,
            category: row.category,
            content: row.content,
            tags: row
                .tags_json
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_default(),
            context: row.context,
            created_at: parse_ts(&row.created_at),
        }
    }
}

/// Observations of an entity in file order.
pub async fn observations_for_entity(
    conn: &mut SqliteConnection,
    entity_id: i64,
) -> KnowledgeResult<Vec<ObservationSummary>> {
    let rows: Vec<ObservationRow> = sqlx::query_as(
        r#"SELECT o.id, o.entity_id, o.category, o.content, o.tags_json, o.context,
                  e.title, e.permalink, e.file_path, e.created_at
           FROM observations o
           JOIN entities e ON e.id = o.entity_id
           WHERE o.entity_id = ?
           ORDER BY o.position"#,
    )
    .bind(entity_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(ObservationSummary::from).collect())
}

type RelationTuple = (i64, i64, Option<i64>, String, String, Option<String>);

fn relation_from_tuple(
    (id, from_id, to_id, to_name, relation_type, context): RelationTuple,
) -> Relation {
    let target = match to_id {
        Some(id) => RelationTarget::Resolved(id),
        None => RelationTarget::Unresolved(to_name.clone()),
    };
    Relation {
        id,
        from_id,
        to_name,
        target,
        relation_type,
        context,
    }
}

pub async fn relations_from(
    conn: &mut SqliteConnection,
    entity_id: i64,
) -> KnowledgeResult<Vec<Relation>> {
    let rows: Vec<RelationTuple> = sqlx::query_as(
        r#"SELECT id, from_id, to_id, to_name, relation_type, context
           FROM relations WHERE from_id = ? ORDER BY id"#,
    )
    .bind(entity_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(relation_from_tuple).collect())
}

pub async fn relations_to(
    conn: &mut SqliteConnection,
    entity_id: i64,
) -> KnowledgeResult<Vec<Relation>> {
    let rows: Vec<RelationTuple> = sqlx::query_as(
        r#"SELECT id, from_id, to_id, to_name, relation_type, context
           FROM relations WHERE to_id = ? ORDER BY id"#,
    )
    .bind(entity_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(relation_from_tuple).collect())
}

async fn edges(conn: &mut SqliteConnection, entity_id: i64) -> KnowledgeResult<Vec<Relation>> {
    let rows: Vec<RelationTuple> = sqlx::query_as(
        r#"SELECT id, from_id, to_id, to_name, relation_type, context
           FROM relations WHERE from_id = ? OR to_id = ? ORDER BY id"#,
    )
    .bind(entity_id)
    .bind(entity_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(relation_from_tuple).collect())
}

/// Entities one hop away from `entity_id`, in either direction.
pub async fn neighbor_ids(
    conn: &mut SqliteConnection,
    entity_id: i64,
) -> KnowledgeResult<Vec<i64>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for relation in edges(conn, entity_id).await? {
        let other = if relation.from_id == entity_id {
            relation.target.resolved_id()
        } else {
            Some(relation.from_id)
        };
        if let Some(other) = other
            && other != entity_id
            && seen.insert(other)
        {
            out.push(other);
        }
    }
    Ok(out)
}

/// Breadth-first walk from `start` following relations both ways.
///
/// Each relation and each newly reached entity is reported with the hop at
/// which it was first seen. Items updated before `since` are dropped, then
/// the list is capped at `max_related`.
pub async fn expand_related(
    conn: &mut SqliteConnection,
    start: i64,
    depth: u8,
    max_related: usize,
    since: Option<DateTime<Utc>>,
) -> KnowledgeResult<Vec<RelatedResult>> {
    let mut visited = HashSet::from([start]);
    let mut seen_relations = HashSet::new();
    let mut frontier = vec![start];
    let mut found: Vec<(u8, SearchItemType, i64)> = Vec::new();

    for hop in 1..=depth {
        let mut next = Vec::new();
        for entity_id in frontier {
            for relation in edges(conn, entity_id).await? {
                if seen_relations.insert(relation.id) {
                    found.push((hop, SearchItemType::Relation, relation.id));
                }
                let other = if relation.from_id == entity_id {
                    relation.target.resolved_id()
                } else {
                    Some(relation.from_id)
                };
                if let Some(other) = other
                    && visited.insert(other)
                {
                    found.push((hop, SearchItemType::Entity, other));
                    next.push(other);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    let mut by_key = HashMap::new();
    for item_type in [SearchItemType::Entity, SearchItemType::Relation] {
        let ids: Vec<i64> = found
            .iter()
            .filter(|(_, t, _)| *t == item_type)
            .map(|(_, _, id)| *id)
            .collect();
        for item in search::items_by_ids(conn, item_type, &ids, since).await? {
            by_key.insert((item_type, item.id()), item);
        }
    }

    Ok(found
        .into_iter()
        .filter_map(|(hop, item_type, id)| {
            by_key
                .remove(&(item_type, id))
                .map(|item| RelatedResult { depth: hop, item })
        })
        .take(max_related)
        .collect())
}

/// Re-link relations against the entities stored right now.
///
/// Every relation of the project (or only those of `source`) goes through
/// the strict resolver chain in id order, so the outcome depends only on
/// the stored entities and never on which of them changed last. A target
/// already claimed by an earlier relation of the same source and type stays
/// unresolved. Rows whose target changes are rewritten together with the
/// search rows of their source. Returns the number of rows rewritten.
pub async fn resolve_relations(
    conn: &mut SqliteConnection,
    project_id: i64,
    source: Option<i64>,
) -> KnowledgeResult<usize> {
    let rows: Vec<(i64, i64, Option<i64>, String, String)> = sqlx::query_as(
        r#"SELECT r.id, r.from_id, r.to_id, r.to_name, r.relation_type
           FROM relations r
           JOIN entities e ON e.id = r.from_id
           WHERE e.project_id = ? AND (? IS NULL OR r.from_id = ?)
           ORDER BY r.id"#,
    )
    .bind(project_id)
    .bind(source)
    .bind(source)
    .fetch_all(&mut *conn)
    .await?;

    let mut cache: HashMap<String, Option<i64>> = HashMap::new();
    let mut claimed: HashSet<(i64, i64, String)> = HashSet::new();
    let mut changes: Vec<(i64, i64, Option<i64>)> = Vec::new();
    for (relation_id, from_id, current, to_name, relation_type) in rows {
        let found = match cache.get(&to_name) {
            Some(hit) => *hit,
            None => {
                let found = LinkResolver::resolve_in_tx(conn, project_id, &to_name, true)
                    .await?
                    .map(|entity| entity.id);
                cache.insert(to_name, found);
                found
            }
        };
        let target = found.filter(|id| claimed.insert((from_id, *id, relation_type.clone())));
        if target != current {
            changes.push((relation_id, from_id, target));
        }
    }

    // Clear first so no intermediate row trips the unique key.
    for (relation_id, _, _) in &changes {
        sqlx::query("UPDATE relations SET to_id = NULL WHERE id = ?")
            .bind(relation_id)
            .execute(&mut *conn)
            .await?;
    }
    for (relation_id, _, target) in &changes {
        if let Some(target) = target {
            sqlx::query("UPDATE relations SET to_id = ? WHERE id = ?")
                .bind(target)
                .bind(relation_id)
                .execute(&mut *conn)
                .await?;
        }
    }

    let dirty: BTreeSet<i64> = changes.iter().map(|(_, from_id, _)| *from_id).collect();
    for from_id in &dirty {
        search::index_relations_from(conn, *from_id).await?;
    }
    debug!(project_id, rewritten = changes.len(), reindexed = dirty.len(), "relation resolution pass");
    Ok(changes.len())
}
