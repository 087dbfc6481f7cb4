//! Local-first markdown knowledge base: files on disk are the source of
//! truth, SQLite holds the derived graph and full-text index.

pub mod engine;
pub mod errors;
pub mod files;
pub mod graph;
pub mod index;
pub mod ingest;
pub mod models;
pub mod parser;
pub mod paths;
pub mod resolver;
pub mod search;
pub mod storage;
pub mod timeframe;
pub mod watcher;

pub use loam_core::config::{ContextDefaults, KnowledgeSettings, SearchDefaults};
pub use errors::{KnowledgeError, KnowledgeResult};
pub use models::{
    ContextMetadata, ContextQuery, ContextResult, Entity, EntitySummary, GraphContext,
    KnowledgeItem, NoteDocument, NoteWriteRequest, NoteWriteResult, Observation,
    ObservationSummary, Project, ProjectContext, RecentActivityQuery, RelatedResult, Relation,
    RelationSummary, RelationTarget, SearchHit, SearchItemType, SearchMode, SearchQuery,
    SearchResponse, SyncFailure, SyncReport,
};
pub use engine::KnowledgeEngine;
pub use resolver::LinkResolver;
pub use watcher::WatchServiceState;
