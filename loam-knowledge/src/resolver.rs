use sqlx::{SqliteConnection, SqlitePool};

use crate::SearchDefaults;
use crate::errors::KnowledgeResult;
use crate::graph::{entity_by_file_path, entity_by_id, entity_by_permalink, entity_by_title};
use crate::models::{Entity, SearchItemType, SearchMode, SearchQuery};
use crate::parser::normalize_link_text;
use crate::paths::generate_permalink;
use crate::search;

const FUZZY_CANDIDATES: usize = 10;

/// Turns link text (`[[Some Note]]`, a permalink, a path) into an entity.
///
/// Lookup order: exact permalink, exact title, exact file path, file path
/// with `.md` appended, the slugged text as a permalink, and finally (unless
/// `strict`) the best title match from full-text search.
#[derive(Debug, Clone)]
pub struct LinkResolver {
    pool: SqlitePool,
    project_id: i64,
}

impl LinkResolver {
    pub fn new(pool: SqlitePool, project_id: i64) -> Self {
        Self { pool, project_id }
    }

    /// Resolve inside a fresh read transaction.
    pub async fn resolve(&self, text: &str, strict: bool) -> KnowledgeResult<Option<Entity>> {
        let mut tx = self.pool.begin().await?;
        let found = Self::resolve_in_tx(&mut tx, self.project_id, text, strict).await?;
        tx.commit().await?;
        Ok(found)
    }

    /// Resolve on a borrowed connection, usually an open write transaction.
    pub async fn resolve_in_tx(
        conn: &mut SqliteConnection,
        project_id: i64,
        text: &str,
        strict: bool,
    ) -> KnowledgeResult<Option<Entity>> {
        let clean = normalize_link_text(text);
        if clean.is_empty() {
            return Ok(None);
        }

        if let Some(entity) = entity_by_permalink(conn, project_id, &clean).await? {
            return Ok(Some(entity));
        }
        if let Some(entity) = entity_by_title(conn, project_id, &clean).await? {
            return Ok(Some(entity));
        }
        if let Some(entity) = entity_by_file_path(conn, project_id, &clean).await? {
            return Ok(Some(entity));
        }
        if clean.contains('/')
            && !clean.ends_with(".md")
            && let Some(entity) =
                entity_by_file_path(conn, project_id, &format!("{clean}.md")).await?
        {
            return Ok(Some(entity));
        }
        let slug = generate_permalink(&clean);
        if slug != clean
            && !slug.is_empty()
            && let Some(entity) = entity_by_permalink(conn, project_id, &slug).await?
        {
            return Ok(Some(entity));
        }

        if strict {
            return Ok(None);
        }
        Self::fuzzy(conn, project_id, &clean).await
    }

    /// Highest scoring title hit. Scores are negated bm25, so the maximum wins.
    async fn fuzzy(
        conn: &mut SqliteConnection,
        project_id: i64,
        text: &str,
    ) -> KnowledgeResult<Option<Entity>> {
        let mut query = SearchQuery::new(SearchMode::Title(text.to_string()));
        query.types = Some(vec![SearchItemType::Entity]);
        query.page_size = Some(FUZZY_CANDIDATES);
        let defaults = SearchDefaults {
            page_size: FUZZY_CANDIDATES,
            max_page_size: FUZZY_CANDIDATES,
            snippet_chars: 0,
        };

        let response = match search::search(conn, project_id, &query, &defaults).await {
            Ok(response) => response,
            Err(err) if matches!(err, crate::KnowledgeError::InvalidQuery(_)) => return Ok(None),
            Err(err) => return Err(err),
        };

        let best = response
            .results
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .map(|hit| hit.item.id());
        match best {
            Some(id) => entity_by_id(conn, id).await,
            None => Ok(None),
        }
    }
}
