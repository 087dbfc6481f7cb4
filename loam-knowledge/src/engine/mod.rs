use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::watch;

use crate::KnowledgeSettings;
use crate::errors::KnowledgeResult;
use crate::index::sync_project;
use crate::models::{
    ContextQuery, EntitySummary, GraphContext, NoteDocument, NoteWriteRequest, NoteWriteResult,
    Project, ProjectContext, RecentActivityQuery, SearchQuery, SearchResponse, SyncReport,
};
use crate::paths::knowledge_db_path;
use crate::resolver::LinkResolver;
use crate::storage::{self, KnowledgeStore, format_ts, parse_ts};

pub(crate) mod context;
pub(crate) mod notes;

type PassGates = Arc<Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>>;

/// Entry point for everything the knowledge base offers. Cheap to clone;
/// clones share the pool and the per-project pass gates.
#[derive(Debug, Clone)]
pub struct KnowledgeEngine {
    settings: KnowledgeSettings,
    store: KnowledgeStore,
    gates: PassGates,
}

impl KnowledgeEngine {
    /// Open the engine on the configured database, running migrations.
    pub async fn open(settings: KnowledgeSettings) -> KnowledgeResult<Self> {
        let path = knowledge_db_path(&settings)?;
        let store = KnowledgeStore::open(&path).await?;
        Ok(Self {
            settings,
            store,
            gates: Arc::default(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        self.store.pool()
    }

    pub fn settings(&self) -> &KnowledgeSettings {
        &self.settings
    }

    /// Gate serializing writes to one project. A pass waits for any pass
    /// already running on the same project.
    pub(crate) fn pass_gate(&self, project_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        gates.entry(project_id).or_default().clone()
    }

    /// Create or update a project rooted at `root` (created if missing).
    pub async fn register_project(
        &self,
        name: &str,
        root: &Path,
    ) -> KnowledgeResult<ProjectContext> {
        tokio::fs::create_dir_all(root).await?;
        let root = tokio::fs::canonicalize(root).await?;
        let mut conn = self.pool().acquire().await?;
        let project = storage::ensure_project(&mut conn, name, &root).await?;
        Ok(project.context())
    }

    pub async fn project(&self, name: &str) -> KnowledgeResult<Option<ProjectContext>> {
        let mut conn = self.pool().acquire().await?;
        Ok(storage::get_project(&mut conn, name)
            .await?
            .map(|project| project.context()))
    }

    pub async fn list_projects(&self) -> KnowledgeResult<Vec<Project>> {
        let mut conn = self.pool().acquire().await?;
        storage::list_projects(&mut conn).await
    }

    /// Mark `name` as the single default project.
    pub async fn set_default_project(&self, name: &str) -> KnowledgeResult<bool> {
        storage::set_default_project(self.pool(), name).await
    }

    pub async fn default_project(&self) -> KnowledgeResult<Option<ProjectContext>> {
        let mut conn = self.pool().acquire().await?;
        Ok(storage::default_project(&mut conn)
            .await?
            .map(|project| project.context()))
    }

    /// Reconcile the project directory with the index.
    pub async fn sync(&self, project: &ProjectContext) -> KnowledgeResult<SyncReport> {
        let gate = self.pass_gate(project.id);
        let _pass = gate.lock().await;
        let report = sync_project(self.pool(), project).await?;
        if report.is_empty() {
            return Ok(report);
        }

        sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)")
            .bind(last_sync_key(project))
            .bind(format_ts(Utc::now()))
            .execute(self.pool())
            .await?;
        Ok(report)
    }

    /// When the last sync pass of `project` that changed something finished.
    pub async fn last_sync(&self, project: &ProjectContext) -> KnowledgeResult<Option<DateTime<Utc>>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM meta WHERE key = ? LIMIT 1")
            .bind(last_sync_key(project))
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|(value,)| parse_ts(&value)))
    }

    pub async fn search(
        &self,
        project: &ProjectContext,
        query: &SearchQuery,
    ) -> KnowledgeResult<SearchResponse> {
        let mut tx = self.pool().begin().await?;
        let response =
            crate::search::search(&mut tx, project.id, query, &self.settings.search).await?;
        tx.commit().await?;
        Ok(response)
    }

    /// Resolve link text to an entity. With `strict` the fuzzy title search
    /// is skipped.
    pub async fn resolve_link(
        &self,
        project: &ProjectContext,
        text: &str,
        strict: bool,
    ) -> KnowledgeResult<Option<EntitySummary>> {
        let resolver = LinkResolver::new(self.pool().clone(), project.id);
        Ok(resolver
            .resolve(text, strict)
            .await?
            .map(|entity| EntitySummary::from(&entity)))
    }

    pub async fn build_context(
        &self,
        project: &ProjectContext,
        query: &ContextQuery,
    ) -> KnowledgeResult<GraphContext> {
        context::build_context(self, project, query).await
    }

    pub async fn recent_activity(
        &self,
        project: &ProjectContext,
        query: &RecentActivityQuery,
    ) -> KnowledgeResult<GraphContext> {
        context::recent_activity(self, project, query).await
    }

    /// Write a note through the markdown codec and index it right away.
    pub async fn write_note(
        &self,
        project: &ProjectContext,
        request: NoteWriteRequest,
    ) -> KnowledgeResult<NoteWriteResult> {
        notes::write_note(self, project, request).await
    }

    pub async fn read_note(
        &self,
        project: &ProjectContext,
        identifier: &str,
    ) -> KnowledgeResult<Option<NoteDocument>> {
        notes::read_note(self, project, identifier).await
    }

    /// Delete the file behind `identifier` and drop it from the index.
    pub async fn delete_note(
        &self,
        project: &ProjectContext,
        identifier: &str,
    ) -> KnowledgeResult<bool> {
        notes::delete_note(self, project, identifier).await
    }

    /// Watch the project directory until `shutdown` flips to true.
    pub async fn watch(
        &self,
        project: &ProjectContext,
        shutdown: watch::Receiver<bool>,
    ) -> KnowledgeResult<()> {
        crate::watcher::run_watcher(self.clone(), project.clone(), shutdown).await
    }
}

fn last_sync_key(project: &ProjectContext) -> String {
    format!("last_sync:{}", project.id)
}
