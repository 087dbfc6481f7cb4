use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use super::KnowledgeEngine;
use crate::errors::KnowledgeResult;
use crate::graph::{entities_by_ids, expand_related, neighbor_ids, observations_for_entity};
use crate::models::{
    ContextMetadata, ContextQuery, ContextResult, EntitySummary, GraphContext, KnowledgeItem,
    ProjectContext, RecentActivityQuery, SearchItemType, SearchMode, SearchQuery,
};
use crate::resolver::LinkResolver;
use crate::search::{self, recent_items};
use crate::timeframe::parse_timeframe;

const MEMORY_SCHEME: &str = "memory://";

/// How the primaries of a context request are picked.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ContextTarget {
    Pattern(String),
    Related(String),
    Fuzzy(String),
    Permalink(String),
}

fn parse_target(url: &str) -> Option<ContextTarget> {
    let path = url
        .trim()
        .strip_prefix(MEMORY_SCHEME)
        .unwrap_or(url.trim())
        .trim_matches('/');
    if path.is_empty() {
        return None;
    }
    let target = if path.contains('*') {
        ContextTarget::Pattern(path.to_string())
    } else if let Some(rest) = path.strip_prefix("related/") {
        ContextTarget::Related(rest.to_string())
    } else if let Some(rest) = path.strip_prefix("context/") {
        ContextTarget::Fuzzy(rest.to_string())
    } else {
        ContextTarget::Permalink(path.to_string())
    };
    Some(target)
}

struct Paging {
    page: usize,
    page_size: usize,
    depth: u8,
    max_related: usize,
}

impl Paging {
    fn new(
        engine: &KnowledgeEngine,
        page: Option<usize>,
        page_size: Option<usize>,
        depth: Option<u8>,
        max_related: Option<usize>,
    ) -> Self {
        let settings = engine.settings();
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(settings.search.page_size)
                .clamp(1, settings.search.max_page_size.max(1)),
            depth: depth
                .unwrap_or(settings.context.depth)
                .min(settings.context.max_depth),
            max_related: max_related.unwrap_or(settings.context.max_related),
        }
    }

    fn offset(&self) -> usize {
        (self.page - 1) * self.page_size
    }

    /// Cut one page out of a full list.
    fn slice<T>(&self, items: Vec<T>) -> (Vec<T>, bool) {
        let total = items.len();
        let page: Vec<T> = items
            .into_iter()
            .skip(self.offset())
            .take(self.page_size)
            .collect();
        let has_more = total > self.offset() + page.len();
        (page, has_more)
    }
}

/// Assemble the neighborhood of whatever `query.url` designates.
pub(crate) async fn build_context(
    engine: &KnowledgeEngine,
    project: &ProjectContext,
    query: &ContextQuery,
) -> KnowledgeResult<GraphContext> {
    let paging = Paging::new(
        engine,
        Some(query.page),
        query.page_size,
        query.depth,
        query.max_related,
    );
    let since = query
        .timeframe
        .as_deref()
        .map(|timeframe| parse_timeframe(timeframe, Utc::now()))
        .transpose()?;

    let mut tx = engine.pool().begin().await?;
    let (primaries, has_more) = match parse_target(&query.url) {
        None => (Vec::new(), false),
        Some(target) => {
            select_primaries(&mut tx, engine, project, &target, &paging).await?
        }
    };
    let results = expand_primaries(&mut tx, primaries, &paging, since).await?;
    tx.commit().await?;

    debug!(
        project = %project.name,
        url = %query.url,
        primaries = results.len(),
        "built context"
    );
    let types = distinct_types(&results);
    Ok(assemble(
        results,
        Some(query.url.clone()),
        types,
        query.timeframe.clone(),
        &paging,
        has_more,
    ))
}

/// Items of `query.types` changed within the timeframe, newest first, each
/// with its neighborhood restricted to the same timeframe.
pub(crate) async fn recent_activity(
    engine: &KnowledgeEngine,
    project: &ProjectContext,
    query: &RecentActivityQuery,
) -> KnowledgeResult<GraphContext> {
    let paging = Paging::new(
        engine,
        query.page,
        query.page_size,
        query.depth,
        query.max_related,
    );
    let types = query
        .types
        .clone()
        .filter(|types| !types.is_empty())
        .unwrap_or_else(|| vec![SearchItemType::Entity]);
    let timeframe = query
        .timeframe
        .clone()
        .unwrap_or_else(|| engine.settings().context.timeframe.clone());
    let since = parse_timeframe(&timeframe, Utc::now())?;

    let mut tx = engine.pool().begin().await?;
    let mut primaries = recent_items(
        &mut tx,
        project.id,
        &types,
        Some(since),
        paging.page_size + 1,
        paging.offset(),
    )
    .await?;
    let has_more = primaries.len() > paging.page_size;
    primaries.truncate(paging.page_size);
    let results = expand_primaries(&mut tx, primaries, &paging, Some(since)).await?;
    tx.commit().await?;

    Ok(assemble(
        results,
        None,
        types,
        Some(timeframe),
        &paging,
        has_more,
    ))
}

async fn select_primaries(
    conn: &mut SqliteConnection,
    engine: &KnowledgeEngine,
    project: &ProjectContext,
    target: &ContextTarget,
    paging: &Paging,
) -> KnowledgeResult<(Vec<KnowledgeItem>, bool)> {
    match target {
        ContextTarget::Pattern(pattern) => {
            search_primaries(conn, engine, project, SearchMode::PermalinkPattern(pattern.clone()), paging)
                .await
        }
        ContextTarget::Permalink(permalink) => {
            search_primaries(conn, engine, project, SearchMode::Permalink(permalink.clone()), paging)
                .await
        }
        ContextTarget::Fuzzy(text) => {
            let found = LinkResolver::resolve_in_tx(conn, project.id, text, false).await?;
            let items: Vec<KnowledgeItem> = found
                .iter()
                .map(|entity| KnowledgeItem::Entity(EntitySummary::from(entity)))
                .collect();
            Ok(paging.slice(items))
        }
        ContextTarget::Related(text) => {
            let Some(anchor) = LinkResolver::resolve_in_tx(conn, project.id, text, true).await?
            else {
                return Ok((Vec::new(), false));
            };
            let ids = neighbor_ids(conn, anchor.id).await?;
            let mut entities = entities_by_ids(conn, &ids).await?;
            entities.sort_by_key(|entity| ids.iter().position(|id| *id == entity.id));
            let items = entities
                .iter()
                .map(|entity| KnowledgeItem::Entity(EntitySummary::from(entity)))
                .collect();
            Ok(paging.slice(items))
        }
    }
}

async fn search_primaries(
    conn: &mut SqliteConnection,
    engine: &KnowledgeEngine,
    project: &ProjectContext,
    mode: SearchMode,
    paging: &Paging,
) -> KnowledgeResult<(Vec<KnowledgeItem>, bool)> {
    let mut query = SearchQuery::new(mode);
    query.page = paging.page;
    query.page_size = Some(paging.page_size);
    let response = search::search(conn, project.id, &query, &engine.settings().search).await?;
    let items = response.results.into_iter().map(|hit| hit.item).collect();
    Ok((items, response.has_more))
}

async fn expand_primaries(
    conn: &mut SqliteConnection,
    primaries: Vec<KnowledgeItem>,
    paging: &Paging,
    since: Option<DateTime<Utc>>,
) -> KnowledgeResult<Vec<ContextResult>> {
    let mut results = Vec::with_capacity(primaries.len());
    for primary in primaries {
        let observations = match &primary {
            KnowledgeItem::Entity(entity) => observations_for_entity(conn, entity.id).await?,
            _ => Vec::new(),
        };
        let primary_key = (primary.item_type(), primary.id());
        let related_results = expand_related(
            conn,
            primary.anchor_entity_id(),
            paging.depth,
            paging.max_related.saturating_add(1),
            since,
        )
        .await?
        .into_iter()
        .filter(|related| (related.item.item_type(), related.item.id()) != primary_key)
        .take(paging.max_related)
        .collect();
        results.push(ContextResult {
            primary_result: primary,
            observations,
            related_results,
        });
    }
    Ok(results)
}

fn distinct_types(results: &[ContextResult]) -> Vec<SearchItemType> {
    let mut types: Vec<SearchItemType> = results
        .iter()
        .map(|result| result.primary_result.item_type())
        .collect();
    types.sort();
    types.dedup();
    types
}

fn assemble(
    results: Vec<ContextResult>,
    uri: Option<String>,
    types: Vec<SearchItemType>,
    timeframe: Option<String>,
    paging: &Paging,
    has_more: bool,
) -> GraphContext {
    let related_count = results.iter().map(|r| r.related_results.len()).sum();
    let total_observations = results.iter().map(|r| r.observations.len()).sum();
    let total_relations = results
        .iter()
        .map(|r| {
            let primary = usize::from(r.primary_result.item_type() == SearchItemType::Relation);
            primary
                + r.related_results
                    .iter()
                    .filter(|related| related.item.item_type() == SearchItemType::Relation)
                    .count()
        })
        .sum();

    GraphContext {
        metadata: ContextMetadata {
            uri,
            types,
            depth: paging.depth,
            timeframe,
            generated_at: Utc::now(),
            primary_count: results.len(),
            related_count,
            total_observations,
            total_relations,
        },
        results,
        page: paging.page,
        page_size: paging.page_size,
        has_more,
    }
}
