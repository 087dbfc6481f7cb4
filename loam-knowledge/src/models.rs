use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Explicit project handle threaded through every engine call.
///
/// There is no process-wide "active project"; callers pick one and pass it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub id: i64,
    pub name: String,
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub permalink: String,
    pub path: PathBuf,
    pub is_active: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn context(&self) -> ProjectContext {
        ProjectContext {
            id: self.id,
            name: self.name.clone(),
            root: self.path.clone(),
        }
    }
}

/// A knowledge node backed by exactly one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub entity_type: String,
    pub permalink: String,
    pub file_path: String,
    pub content_type: String,
    pub metadata: serde_json::Value,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Categorized note attached to an entity. Order is the order of appearance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub category: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub context: Option<String>,
}

pub const DEFAULT_OBSERVATION_CATEGORY: &str = "Note";
pub const IMPLICIT_RELATION_TYPE: &str = "links to";

/// Where a relation points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum RelationTarget {
    Resolved(i64),
    Unresolved(String),
}

impl RelationTarget {
    pub fn resolved_id(&self) -> Option<i64> {
        match self {
            Self::Resolved(id) => Some(*id),
            Self::Unresolved(_) => None,
        }
    }
}

/// Stored directed edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: i64,
    pub from_id: i64,
    /// Reference text as written in the source file.
    pub to_name: String,
    pub target: RelationTarget,
    pub relation_type: String,
    pub context: Option<String>,
}

/// Per-file state remembered between syncs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub entity_id: i64,
    pub file_path: String,
    pub checksum: String,
    pub mtime_ms: i64,
    pub size_bytes: i64,
    pub permalink: String,
}

// ── Result items ─────────────────────────────────────────────────────

/// Discriminant of [`KnowledgeItem`], also stored in the search index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SearchItemType {
    Entity,
    Observation,
    Relation,
}

impl SearchItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Observation => "observation",
            Self::Relation => "relation",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![Self::Entity, Self::Observation, Self::Relation]
    }
}

impl FromStr for SearchItemType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entity" => Ok(Self::Entity),
            "observation" => Ok(Self::Observation),
            "relation" => Ok(Self::Relation),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for SearchItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: i64,
    pub title: String,
    pub entity_type: String,
    pub permalink: String,
    pub file_path: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Entity> for EntitySummary {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id,
            title: entity.title.clone(),
            entity_type: entity.entity_type.clone(),
            permalink: entity.permalink.clone(),
            file_path: entity.file_path.clone(),
            content_type: entity.content_type.clone(),
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSummary {
    pub id: i64,
    pub entity_id: i64,
    /// Title of the owning entity.
    pub title: String,
    pub permalink: String,
    pub file_path: String,
    pub category: String,
    pub content: String,
    pub tags: Vec<String>,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationSummary {
    pub id: i64,
    pub title: String,
    pub permalink: String,
    pub file_path: String,
    pub relation_type: String,
    pub from_id: i64,
    pub to_id: Option<i64>,
    /// Permalink of the source entity.
    pub from_entity: String,
    /// Permalink of the target entity, when resolved.
    pub to_entity: Option<String>,
    pub to_name: String,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One entity, observation or relation in a search or context result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KnowledgeItem {
    Entity(EntitySummary),
    Observation(ObservationSummary),
    Relation(RelationSummary),
}

impl KnowledgeItem {
    pub fn item_type(&self) -> SearchItemType {
        match self {
            Self::Entity(_) => SearchItemType::Entity,
            Self::Observation(_) => SearchItemType::Observation,
            Self::Relation(_) => SearchItemType::Relation,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Entity(item) => item.id,
            Self::Observation(item) => item.id,
            Self::Relation(item) => item.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Entity(item) => &item.title,
            Self::Observation(item) => &item.title,
            Self::Relation(item) => &item.title,
        }
    }

    pub fn permalink(&self) -> &str {
        match self {
            Self::Entity(item) => &item.permalink,
            Self::Observation(item) => &item.permalink,
            Self::Relation(item) => &item.permalink,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Entity(item) => item.created_at,
            Self::Observation(item) => item.created_at,
            Self::Relation(item) => item.created_at,
        }
    }

    /// The entity this item hangs off: itself, its owner, or the relation source.
    pub fn anchor_entity_id(&self) -> i64 {
        match self {
            Self::Entity(item) => item.id,
            Self::Observation(item) => item.entity_id,
            Self::Relation(item) => item.from_id,
        }
    }
}

// ── Search ───────────────────────────────────────────────────────────

/// How the query string is matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum SearchMode {
    /// Free text over titles, bodies and observation content. Supports
    /// `AND` / `OR` / `NOT` and parentheses.
    Text(String),
    /// Free text restricted to titles.
    Title(String),
    /// Exact permalink.
    Permalink(String),
    /// Glob over permalinks (`specs/*`).
    PermalinkPattern(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub mode: SearchMode,
    #[serde(default)]
    pub types: Option<Vec<SearchItemType>>,
    #[serde(default)]
    pub entity_types: Option<Vec<String>>,
    #[serde(default)]
    pub after_date: Option<DateTime<Utc>>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default)]
    pub page_size: Option<usize>,
}

impl SearchQuery {
    pub fn new(mode: SearchMode) -> Self {
        Self {
            mode,
            types: None,
            entity_types: None,
            after_date: None,
            page: 1,
            page_size: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(SearchMode::Text(text.into()))
    }
}

fn default_page() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Relevance, higher is better.
    pub score: f32,
    pub snippet: String,
    pub item: KnowledgeItem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

// ── Graph context ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextQuery {
    /// Permalink, glob pattern, `related/<ref>` or `context/<ref>`;
    /// an optional `memory://` prefix is ignored.
    pub url: String,
    pub depth: Option<u8>,
    pub timeframe: Option<String>,
    #[serde(default = "default_page")]
    pub page: usize,
    pub page_size: Option<usize>,
    pub max_related: Option<usize>,
}

impl ContextQuery {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            depth: None,
            timeframe: None,
            page: 1,
            page_size: None,
            max_related: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecentActivityQuery {
    pub types: Option<Vec<SearchItemType>>,
    pub timeframe: Option<String>,
    pub depth: Option<u8>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub max_related: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedResult {
    /// Hop count from the primary result.
    pub depth: u8,
    pub item: KnowledgeItem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextResult {
    pub primary_result: KnowledgeItem,
    pub observations: Vec<ObservationSummary>,
    pub related_results: Vec<RelatedResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub uri: Option<String>,
    pub types: Vec<SearchItemType>,
    pub depth: u8,
    pub timeframe: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub primary_count: usize,
    pub related_count: usize,
    pub total_observations: usize,
    pub total_relations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphContext {
    pub results: Vec<ContextResult>,
    pub metadata: ContextMetadata,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

// ── Sync ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub path: String,
    pub reason: String,
}

/// Outcome of one reconciliation pass. Paths are relative to the project root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub new: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    /// old path -> new path
    pub moves: BTreeMap<String, String>,
    /// Checksums of every new, modified or moved file.
    pub checksums: BTreeMap<String, String>,
    /// Files that could not be read or written.
    pub errors: Vec<SyncFailure>,
    /// Files rejected at the store boundary (duplicate permalink, ...).
    pub skipped: Vec<SyncFailure>,
}

impl SyncReport {
    /// No file changed since the last pass.
    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.moves.is_empty()
    }

    pub fn total(&self) -> usize {
        self.new.len() + self.modified.len() + self.deleted.len() + self.moves.len()
    }
}

// ── Notes ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteWriteRequest {
    pub title: String,
    /// Folder relative to the project root ("" for the root).
    pub folder: String,
    pub content: String,
    pub entity_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub permalink: Option<String>,
    /// Refuse the write when the file on disk no longer has this checksum.
    pub expected_checksum: Option<String>,
}

impl NoteWriteRequest {
    pub fn new(
        title: impl Into<String>,
        folder: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            folder: folder.into(),
            content: content.into(),
            entity_type: None,
            tags: Vec::new(),
            metadata: serde_json::Map::new(),
            permalink: None,
            expected_checksum: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteWriteResult {
    pub entity: EntitySummary,
    pub file_path: String,
    pub checksum: String,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteDocument {
    pub entity: Entity,
    pub observations: Vec<ObservationSummary>,
    pub relations: Vec<Relation>,
    /// Resolved relations other entities hold towards this one.
    pub backlinks: Vec<Relation>,
    /// Raw file content.
    pub content: String,
}
