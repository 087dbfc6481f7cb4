//! FTS5 index over entities, observations and relations.
//!
//! Rows are rewritten by the store inside the same transaction as the
//! relational change they mirror, so a reader never sees one without the other.

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::SqliteConnection;

use crate::SearchDefaults;
use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::models::{
    Entity, EntitySummary, KnowledgeItem, ObservationSummary, RelationSummary, SearchHit,
    SearchItemType, SearchMode, SearchQuery, SearchResponse,
};
use crate::paths::generate_permalink;
use crate::storage::{format_ts, parse_ts, placeholders};

const SELECT_COLUMNS: &str = "id, type, title, content_snippet, permalink, file_path, from_id, \
     to_id, relation_type, entity_id, category, metadata, created_at, updated_at";

/// Column weights for bm25: id, title, content_stems, content_snippet, permalink.
const BM25_SCORE: &str = "-bm25(search_index, 0.0, 4.0, 1.0, 0.0, 2.0)";

/// Longest display snippet stored for an entity. Queries trim it further to
/// `snippet_chars`.
pub const STORED_SNIPPET_CHARS: usize = 500;

// ── Writing ──────────────────────────────────────────────────────────

/// Rewrite the entity row and the rows of its observations.
pub async fn index_entity(
    conn: &mut SqliteConnection,
    entity: &Entity,
    content: &str,
) -> KnowledgeResult<()> {
    sqlx::query(
        "DELETE FROM search_index WHERE (type = 'entity' AND id = ?) OR (type = 'observation' AND entity_id = ?)",
    )
    .bind(entity.id)
    .bind(entity.id)
    .execute(&mut *conn)
    .await?;

    let metadata = json!({
        "entity_type": entity.entity_type,
        "content_type": entity.content_type,
        "tags": entity.metadata.get("tags").cloned().unwrap_or_else(|| json!([])),
    });
    sqlx::query(
        r#"INSERT INTO search_index (
               id, title, content_stems, content_snippet, permalink, file_path, type,
               entity_id, metadata, created_at, updated_at, project_id
           ) VALUES (?, ?, ?, ?, ?, ?, 'entity', ?, ?, ?, ?, ?)"#,
    )
    .bind(entity.id)
    .bind(&entity.title)
    .bind(content)
    .bind(stored_snippet(content))
    .bind(&entity.permalink)
    .bind(&entity.file_path)
    .bind(entity.id)
    .bind(metadata.to_string())
    .bind(format_ts(entity.created_at))
    .bind(format_ts(entity.updated_at))
    .bind(entity.project_id)
    .execute(&mut *conn)
    .await?;

    for row in load_observation_rows(conn, entity.id).await? {
        let mut stems = row.content.clone();
        if let Some(context) = &row.context {
            stems.push(' ');
            stems.push_str(context);
        }
        let tags: Vec<String> = serde_json::from_str(row.tags_json.as_deref().unwrap_or("[]"))
            .unwrap_or_default();
        for tag in &tags {
            stems.push(' ');
            stems.push_str(tag);
        }
        let metadata = json!({
            "entity_type": entity.entity_type,
            "entity_title": entity.title,
            "tags": tags,
            "context": row.context,
        });
        sqlx::query(
            r#"INSERT INTO search_index (
                   id, title, content_stems, content_snippet, permalink, file_path, type,
                   entity_id, category, metadata, created_at, updated_at, project_id
               ) VALUES (?, ?, ?, ?, ?, ?, 'observation', ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(row.id)
        .bind(&row.category)
        .bind(&stems)
        .bind(&row.content)
        .bind(observation_permalink(&entity.permalink, &row.category, &row.content))
        .bind(&entity.file_path)
        .bind(entity.id)
        .bind(&row.category)
        .bind(metadata.to_string())
        .bind(format_ts(entity.created_at))
        .bind(format_ts(entity.updated_at))
        .bind(entity.project_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Update permalink/file_path columns after a move without touching content.
pub async fn refresh_entity_location(
    conn: &mut SqliteConnection,
    entity: &Entity,
) -> KnowledgeResult<()> {
    sqlx::query("UPDATE search_index SET permalink = ?, file_path = ? WHERE type = 'entity' AND id = ?")
        .bind(&entity.permalink)
        .bind(&entity.file_path)
        .bind(entity.id)
        .execute(&mut *conn)
        .await?;

    for row in load_observation_rows(conn, entity.id).await? {
        sqlx::query(
            "UPDATE search_index SET permalink = ?, file_path = ? WHERE type = 'observation' AND id = ?",
        )
        .bind(observation_permalink(&entity.permalink, &row.category, &row.content))
        .bind(&entity.file_path)
        .bind(row.id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Rewrite the rows of every relation whose source is `from_id`.
pub async fn index_relations_from(
    conn: &mut SqliteConnection,
    from_id: i64,
) -> KnowledgeResult<()> {
    sqlx::query("DELETE FROM search_index WHERE type = 'relation' AND from_id = ?")
        .bind(from_id)
        .execute(&mut *conn)
        .await?;

    let rows: Vec<RelationIndexRow> = sqlx::query_as(
        r#"SELECT r.id, r.from_id, r.to_id, r.to_name, r.relation_type, r.context,
                  f.title AS from_title, f.permalink AS from_permalink, f.file_path AS from_file_path,
                  f.entity_type AS from_entity_type, f.project_id, f.created_at, f.updated_at,
                  t.permalink AS to_permalink
           FROM relations r
           JOIN entities f ON f.id = r.from_id
           LEFT JOIN entities t ON t.id = r.to_id
           WHERE r.from_id = ?
           ORDER BY r.id"#,
    )
    .bind(from_id)
    .fetch_all(&mut *conn)
    .await?;

    for row in rows {
        let target = row
            .to_permalink
            .clone()
            .unwrap_or_else(|| generate_permalink(&row.to_name));
        let permalink = format!(
            "{}/{}/{}",
            row.from_permalink,
            generate_permalink(&row.relation_type),
            target
        );
        let title = format!("{} → {}", row.from_title, row.to_name);
        let mut stems = format!("{} {}", row.relation_type, row.to_name);
        if let Some(context) = &row.context {
            stems.push(' ');
            stems.push_str(context);
        }
        let metadata = json!({
            "entity_type": row.from_entity_type,
            "to_name": row.to_name,
            "context": row.context,
            "from_permalink": row.from_permalink,
            "to_permalink": row.to_permalink,
        });
        sqlx::query(
            r#"INSERT INTO search_index (
                   id, title, content_stems, content_snippet, permalink, file_path, type,
                   from_id, to_id, relation_type, metadata, created_at, updated_at, project_id
               ) VALUES (?, ?, ?, ?, ?, ?, 'relation', ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(row.id)
        .bind(&title)
        .bind(&stems)
        .bind(&stems)
        .bind(&permalink)
        .bind(&row.from_file_path)
        .bind(row.from_id)
        .bind(row.to_id)
        .bind(&row.relation_type)
        .bind(metadata.to_string())
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .bind(row.project_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Drop every row that mentions the entity.
pub async fn remove_entity_rows(conn: &mut SqliteConnection, entity_id: i64) -> KnowledgeResult<()> {
    sqlx::query(
        r#"DELETE FROM search_index
           WHERE (type = 'entity' AND id = ?)
              OR (type = 'observation' AND entity_id = ?)
              OR (type = 'relation' AND (from_id = ? OR to_id = ?))"#,
    )
    .bind(entity_id)
    .bind(entity_id)
    .bind(entity_id)
    .bind(entity_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub fn observation_permalink(entity_permalink: &str, category: &str, content: &str) -> String {
    format!(
        "{}/observations/{}/{}",
        entity_permalink,
        generate_permalink(category),
        generate_permalink(&content.replace('/', " "))
    )
}

#[derive(Debug, sqlx::FromRow)]
struct ObservationIndexRow {
    id: i64,
    category: String,
    content: String,
    tags_json: Option<String>,
    context: Option<String>,
}

async fn load_observation_rows(
    conn: &mut SqliteConnection,
    entity_id: i64,
) -> KnowledgeResult<Vec<ObservationIndexRow>> {
    let rows = sqlx::query_as(
        r#"SELECT id, category, content, tags_json, context
           FROM observations WHERE entity_id = ? ORDER BY position"#,
    )
    .bind(entity_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

#[derive(Debug, sqlx::FromRow)]
struct RelationIndexRow {
    id: i64,
    from_id: i64,
    to_id: Option<i64>,
    to_name: String,
    relation_type: String,
    context: Option<String>,
    from_title: String,
    from_permalink: String,
    from_file_path: String,
    from_entity_type: String,
    project_id: i64,
    created_at: String,
    updated_at: String,
    to_permalink: Option<String>,
}

// ── Querying ─────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct SearchRow {
    id: i64,
    #[sqlx(rename = "type")]
    item_type: String,
    title: String,
    content_snippet: Option<String>,
    permalink: String,
    file_path: String,
    from_id: Option<i64>,
    to_id: Option<i64>,
    relation_type: Option<String>,
    entity_id: Option<i64>,
    category: Option<String>,
    metadata: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct ScoredRow {
    #[sqlx(flatten)]
    row: SearchRow,
    score: f64,
}

fn meta_str(meta: &serde_json::Value, key: &str) -> Option<String> {
    meta.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

impl SearchRow {
    fn snippet(&self, max_chars: usize) -> String {
        let text = self.content_snippet.as_deref().unwrap_or_default();
        text.chars().take(max_chars).collect()
    }

    fn into_item(self) -> Option<KnowledgeItem> {
        let meta: serde_json::Value = self
            .metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        let created_at = parse_ts(&self.created_at);
        let item_type: SearchItemType = self.item_type.parse().ok()?;
        let item = match item_type {
            SearchItemType::Entity => KnowledgeItem::Entity(EntitySummary {
                id: self.id,
                title: self.title,
                entity_type: meta_str(&meta, "entity_type").unwrap_or_default(),
                permalink: self.permalink,
                file_path: self.file_path,
                content_type: meta_str(&meta, "content_type").unwrap_or_default(),
                created_at,
                updated_at: parse_ts(&self.updated_at),
            }),
            SearchItemType::Observation => KnowledgeItem::Observation(ObservationSummary {
                id: self.id,
                entity_id: self.entity_id.unwrap_or_default(),
                title: meta_str(&meta, "entity_title").unwrap_or_default(),
                permalink: self.permalink,
                file_path: self.file_path,
                category: self.category.unwrap_or_default(),
                content: self.content_snippet.unwrap_or_default(),
                tags: meta
                    .get("tags")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default(),
                context: meta_str(&meta, "context"),
                created_at,
            }),
            SearchItemType::Relation => KnowledgeItem::Relation(RelationSummary {
                id: self.id,
                title: self.title,
                permalink: self.permalink,
                file_path: self.file_path,
                relation_type: self.relation_type.unwrap_or_default(),
                from_id: self.from_id.unwrap_or_default(),
                to_id: self.to_id,
                from_entity: meta_str(&meta, "from_permalink").unwrap_or_default(),
                to_entity: meta_str(&meta, "to_permalink"),
                to_name: meta_str(&meta, "to_name").unwrap_or_default(),
                context: meta_str(&meta, "context"),
                created_at,
            }),
        };
        Some(item)
    }
}

fn effective_page_size(requested: Option<usize>, defaults: &SearchDefaults) -> usize {
    requested
        .unwrap_or(defaults.page_size)
        .clamp(1, defaults.max_page_size.max(1))
}

/// Run a search scoped to one project. Scores are `-bm25`: higher is better.
pub async fn search(
    conn: &mut SqliteConnection,
    project_id: i64,
    query: &SearchQuery,
    defaults: &SearchDefaults,
) -> KnowledgeResult<SearchResponse> {
    let page = query.page.max(1);
    let page_size = effective_page_size(query.page_size, defaults);
    let empty = SearchResponse {
        results: Vec::new(),
        page,
        page_size,
        has_more: false,
    };

    let mut clauses = Vec::new();
    let mut binds: Vec<String> = Vec::new();
    let scored = match &query.mode {
        SearchMode::Text(text) => {
            let Some(expr) = build_fts_query(text) else {
                return Ok(empty);
            };
            clauses.push("search_index MATCH ?".to_string());
            binds.push(format!("{{title content_stems}} : ({expr})"));
            true
        }
        SearchMode::Title(text) => {
            let Some(expr) = build_fts_query(text) else {
                return Ok(empty);
            };
            clauses.push("search_index MATCH ?".to_string());
            binds.push(format!("title : ({expr})"));
            true
        }
        SearchMode::Permalink(permalink) => {
            clauses.push("permalink = ?".to_string());
            binds.push(permalink.trim().trim_matches('/').to_string());
            false
        }
        SearchMode::PermalinkPattern(pattern) => {
            clauses.push("permalink GLOB ?".to_string());
            binds.push(pattern.trim().trim_matches('/').to_string());
            false
        }
    };

    if let Some(types) = query.types.as_ref().filter(|t| !t.is_empty()) {
        clauses.push(format!("type IN ({})", placeholders(types.len())));
        binds.extend(types.iter().map(|t| t.as_str().to_string()));
    }
    if let Some(entity_types) = query.entity_types.as_ref().filter(|t| !t.is_empty()) {
        clauses.push(format!(
            "json_extract(metadata, '$.entity_type') IN ({})",
            placeholders(entity_types.len())
        ));
        binds.extend(entity_types.iter().cloned());
    }
    if let Some(after) = query.after_date {
        clauses.push("updated_at > ?".to_string());
        binds.push(format_ts(after));
    }

    let score_expr = if scored { BM25_SCORE } else { "0.0" };
    let sql = format!(
        r#"SELECT {SELECT_COLUMNS}, {score_expr} AS score
           FROM search_index
           WHERE project_id = ? AND {}
           ORDER BY score DESC, updated_at DESC, permalink ASC
           LIMIT ? OFFSET ?"#,
        clauses.join(" AND ")
    );

    let mut q = sqlx::query_as::<_, ScoredRow>(&sql).bind(project_id);
    for value in &binds {
        q = q.bind(value);
    }
    let rows = q
        .bind((page_size + 1) as i64)
        .bind(((page - 1) * page_size) as i64)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_match_error)?;

    let has_more = rows.len() > page_size;
    let results = rows
        .into_iter()
        .take(page_size)
        .filter_map(|scored| {
            let snippet = scored.row.snippet(defaults.snippet_chars);
            let score = scored.score as f32;
            scored
                .row
                .into_item()
                .map(|item| SearchHit { score, snippet, item })
        })
        .collect();

    Ok(SearchResponse {
        results,
        page,
        page_size,
        has_more,
    })
}

fn map_match_error(err: sqlx::Error) -> KnowledgeError {
    if let sqlx::Error::Database(db) = &err {
        let message = db.message();
        if message.contains("fts5") || message.contains("syntax error") {
            return KnowledgeError::InvalidQuery(message.to_string());
        }
    }
    KnowledgeError::Sqlx(err)
}

/// Load items of one kind by id, in the order of `ids`, optionally only
/// those updated at or after `since`.
pub async fn items_by_ids(
    conn: &mut SqliteConnection,
    item_type: SearchItemType,
    ids: &[i64],
    since: Option<DateTime<Utc>>,
) -> KnowledgeResult<Vec<KnowledgeItem>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let since_clause = if since.is_some() { " AND updated_at >= ?" } else { "" };
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM search_index WHERE type = ? AND id IN ({}){since_clause}",
        placeholders(ids.len())
    );
    let mut q = sqlx::query_as::<_, SearchRow>(&sql).bind(item_type.as_str());
    for id in ids {
        q = q.bind(id);
    }
    if let Some(since) = since {
        q = q.bind(format_ts(since));
    }
    let mut items: Vec<KnowledgeItem> = q
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .filter_map(SearchRow::into_item)
        .collect();
    items.sort_by_key(|item| ids.iter().position(|id| *id == item.id()));
    Ok(items)
}

/// Items of the given kinds updated at or after `since`, newest first.
pub async fn recent_items(
    conn: &mut SqliteConnection,
    project_id: i64,
    types: &[SearchItemType],
    since: Option<DateTime<Utc>>,
    limit: usize,
    offset: usize,
) -> KnowledgeResult<Vec<KnowledgeItem>> {
    if types.is_empty() {
        return Ok(Vec::new());
    }
    let since_clause = if since.is_some() { " AND updated_at >= ?" } else { "" };
    let sql = format!(
        r#"SELECT {SELECT_COLUMNS} FROM search_index
           WHERE project_id = ? AND type IN ({}){since_clause}
           ORDER BY updated_at DESC, permalink ASC
           LIMIT ? OFFSET ?"#,
        placeholders(types.len())
    );
    let mut q = sqlx::query_as::<_, SearchRow>(&sql).bind(project_id);
    for item_type in types {
        q = q.bind(item_type.as_str());
    }
    if let Some(since) = since {
        q = q.bind(format_ts(since));
    }
    let rows = q
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().filter_map(SearchRow::into_item).collect())
}

// ── Query syntax ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Phrase(String),
    Open,
    Close,
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut chars = input.chars().peekable();

    let flush = |word: &mut String, tokens: &mut Vec<Token>| {
        if !word.is_empty() {
            tokens.push(Token::Word(std::mem::take(word)));
        }
    };

    while let Some(ch) = chars.next() {
        match ch {
            '(' => {
                flush(&mut word, &mut tokens);
                tokens.push(Token::Open);
            }
            ')' => {
                flush(&mut word, &mut tokens);
                tokens.push(Token::Close);
            }
            '"' => {
                flush(&mut word, &mut tokens);
                let mut phrase = String::new();
                for next in chars.by_ref() {
                    if next == '"' {
                        break;
                    }
                    phrase.push(next);
                }
                if !phrase.trim().is_empty() {
                    tokens.push(Token::Phrase(phrase));
                }
            }
            c if c.is_whitespace() => flush(&mut word, &mut tokens),
            c => word.push(c),
        }
    }
    flush(&mut word, &mut tokens);
    tokens
}

fn is_operator(word: &str) -> bool {
    matches!(word, "AND" | "OR" | "NOT")
}

fn quote(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

fn has_word_chars(term: &str) -> bool {
    term.chars().any(char::is_alphanumeric)
}

/// Translate user input into an FTS5 expression.
///
/// `AND`, `OR`, `NOT` (uppercase, between two operands) and balanced
/// parentheses are kept as operators; every other term is quoted so it can
/// only match whole tokens. Without operators the terms are ANDed and the
/// last one is matched as a prefix. Returns `None` when nothing searchable
/// is left.
pub fn build_fts_query(input: &str) -> Option<String> {
    let mut tokens = tokenize(input);

    let mut depth = 0i32;
    let mut balanced = true;
    for token in &tokens {
        match token {
            Token::Open => depth += 1,
            Token::Close => {
                depth -= 1;
                if depth < 0 {
                    balanced = false;
                }
            }
            _ => {}
        }
    }
    if !balanced || depth != 0 {
        tokens.retain(|t| !matches!(t, Token::Open | Token::Close));
    }

    #[derive(Debug)]
    enum Part {
        Operand(String),
        Op(String),
        Open,
        Close,
    }

    let mut parts: Vec<Part> = Vec::new();
    let mut last_is_plain_word = false;
    for (idx, token) in tokens.iter().enumerate() {
        match token {
            Token::Word(word) if is_operator(word) => {
                let left_ok = matches!(parts.last(), Some(Part::Operand(_) | Part::Close));
                let right_ok = match tokens.get(idx + 1) {
                    Some(Token::Word(next)) => !is_operator(next) && has_word_chars(next),
                    Some(Token::Phrase(_)) | Some(Token::Open) => true,
                    _ => false,
                };
                if left_ok && right_ok {
                    parts.push(Part::Op(word.clone()));
                } else {
                    parts.push(Part::Operand(quote(word)));
                }
                last_is_plain_word = false;
            }
            Token::Word(word) => {
                if has_word_chars(word) {
                    parts.push(Part::Operand(quote(word)));
                    last_is_plain_word = true;
                }
            }
            Token::Phrase(phrase) => {
                if has_word_chars(phrase) {
                    parts.push(Part::Operand(quote(phrase)));
                    last_is_plain_word = false;
                }
            }
            Token::Open => parts.push(Part::Open),
            Token::Close => {
                if matches!(parts.last(), Some(Part::Open)) {
                    parts.pop();
                } else {
                    parts.push(Part::Close);
                }
            }
        }
    }

    if !parts.iter().any(|p| matches!(p, Part::Operand(_))) {
        return None;
    }

    let boolean = parts.iter().any(|p| matches!(p, Part::Op(_) | Part::Open));
    if !boolean {
        let mut operands: Vec<String> = parts
            .into_iter()
            .filter_map(|p| match p {
                Part::Operand(term) => Some(term),
                _ => None,
            })
            .collect();
        if last_is_plain_word && let Some(last) = operands.last_mut() {
            last.push('*');
        }
        return Some(operands.join(" AND "));
    }

    let rendered: Vec<String> = parts
        .into_iter()
        .map(|p| match p {
            Part::Operand(term) => term,
            Part::Op(op) => op,
            Part::Open => "(".to_string(),
            Part::Close => ")".to_string(),
        })
        .collect();
    Some(rendered.join(" "))
}

/// Leading prose of a body for display: whitespace runs collapse to one
/// space, cut on a char boundary.
fn stored_snippet(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(STORED_SNIPPET_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_snippet_is_bounded() {
        assert_eq!(stored_snippet("  one\n\ntwo\tthree "), "one two three");
        let long = "é".repeat(STORED_SNIPPET_CHARS * 2);
        assert_eq!(stored_snippet(&long).chars().count(), STORED_SNIPPET_CHARS);
    }

    #[test]
    fn plain_terms_are_anded_with_prefix() {
        assert_eq!(
            build_fts_query("python flask").as_deref(),
            Some("\"python\" AND \"flask\"*")
        );
    }

    #[test]
    fn boolean_operators_are_preserved() {
        assert_eq!(
            build_fts_query("python AND flask").as_deref(),
            Some("\"python\" AND \"flask\"")
        );
        assert_eq!(
            build_fts_query("(rust OR go) NOT java").as_deref(),
            Some("( \"rust\" OR \"go\" ) NOT \"java\"")
        );
    }

    #[test]
    fn lone_operator_is_a_literal() {
        assert_eq!(build_fts_query("AND").as_deref(), Some("\"AND\""));
        assert_eq!(
            build_fts_query("python AND").as_deref(),
            Some("\"python\" AND \"AND\"")
        );
        assert_eq!(build_fts_query("grand and").as_deref(), Some("\"grand\" AND \"and\"*"));
    }

    #[test]
    fn quotes_are_escaped_and_punctuation_dropped() {
        assert_eq!(build_fts_query("\"exact phrase\"").as_deref(), Some("\"exact phrase\""));
        assert_eq!(build_fts_query("a\"b").as_deref(), Some("\"a\" AND \"b\""));
        assert_eq!(build_fts_query("it's").as_deref(), Some("\"it's\"*"));
        assert_eq!(build_fts_query("  -- ").as_deref(), None);
        assert_eq!(build_fts_query("( )").as_deref(), None);
    }

    #[test]
    fn unbalanced_parens_are_dropped() {
        assert_eq!(build_fts_query("(rust").as_deref(), Some("\"rust\"*"));
    }

    #[test]
    fn observation_permalinks_are_slugged() {
        assert_eq!(
            observation_permalink("specs/auth", "Tech Choice", "Use JWT / OAuth"),
            "specs/auth/observations/tech-choice/use-jwt-oauth"
        );
    }
}
