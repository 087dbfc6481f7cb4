use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::engine::KnowledgeEngine;
use crate::errors::KnowledgeResult;
use crate::files::write_file_atomic;
use crate::models::{ProjectContext, SyncReport};
use crate::paths::{is_eligible, watch_status_path};

pub const MAX_RECENT_EVENTS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub timestamp: DateTime<Utc>,
    pub path: String,
    /// `new`, `modified`, `deleted`, `moved` or `sync`.
    pub action: String,
    /// `success` or `error`.
    pub status: String,
    pub checksum: Option<String>,
    pub error: Option<String>,
}

/// Liveness record of a running watcher, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchServiceState {
    pub running: bool,
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub error_count: usize,
    pub last_error: Option<DateTime<Utc>>,
    pub last_scan: Option<DateTime<Utc>>,
    pub synced_files: usize,
    /// Newest first, at most [`MAX_RECENT_EVENTS`].
    pub recent_events: VecDeque<WatchEvent>,
}

impl WatchServiceState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            running: true,
            pid: std::process::id(),
            start_time: now,
            error_count: 0,
            last_error: None,
            last_scan: None,
            synced_files: 0,
            recent_events: VecDeque::new(),
        }
    }

    /// Fold a finished pass into the state. Returns false, leaving the state
    /// untouched, when the pass changed nothing.
    pub fn record_report(&mut self, report: &SyncReport, now: DateTime<Utc>) -> bool {
        if report.is_empty() && report.errors.is_empty() && report.skipped.is_empty() {
            return false;
        }
        self.last_scan = Some(now);
        self.synced_files += report.total();

        let success = |path: &str, action: &str| WatchEvent {
            timestamp: now,
            path: path.to_string(),
            action: action.to_string(),
            status: "success".to_string(),
            checksum: report.checksums.get(path).cloned(),
            error: None,
        };
        let mut events: Vec<WatchEvent> = Vec::new();
        events.extend(report.new.iter().map(|path| success(path, "new")));
        events.extend(report.modified.iter().map(|path| success(path, "modified")));
        events.extend(report.deleted.iter().map(|path| success(path, "deleted")));
        events.extend(report.moves.iter().map(|(old, new)| {
            let mut event = success(new, "moved");
            event.path = format!("{old} -> {new}");
            event
        }));
        for failure in report.errors.iter().chain(&report.skipped) {
            self.error_count += 1;
            self.last_error = Some(now);
            events.push(WatchEvent {
                timestamp: now,
                path: failure.path.clone(),
                action: "sync".to_string(),
                status: "error".to_string(),
                checksum: None,
                error: Some(failure.reason.clone()),
            });
        }
        for event in events {
            self.push_event(event);
        }
        true
    }

    pub fn record_error(&mut self, message: &str, now: DateTime<Utc>) {
        self.error_count += 1;
        self.last_error = Some(now);
        self.push_event(WatchEvent {
            timestamp: now,
            path: String::new(),
            action: "sync".to_string(),
            status: "error".to_string(),
            checksum: None,
            error: Some(message.to_string()),
        });
    }

    fn push_event(&mut self, event: WatchEvent) {
        self.recent_events.push_front(event);
        self.recent_events.truncate(MAX_RECENT_EVENTS);
    }
}

/// Filesystem events that can change what the index should contain.
pub fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Watch `project` and run a sync pass once changes have settled for
/// `sync_delay_ms`. Returns after `shutdown` turns true, at the next settling
/// boundary.
pub async fn run_watcher(
    engine: KnowledgeEngine,
    project: ProjectContext,
    mut shutdown: watch::Receiver<bool>,
) -> KnowledgeResult<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();
    let root = project.root.clone();

    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else {
                return;
            };
            if !is_relevant(&event.kind) {
                return;
            }
            for path in event.paths {
                if is_eligible(&root, &path) {
                    let _ = tx.send(path);
                }
            }
        })?;
    watcher.watch(&project.root, RecursiveMode::Recursive)?;

    let status_path = watch_status_path(engine.settings())?;
    let delay = Duration::from_millis(engine.settings().sync_delay_ms);
    let mut state = WatchServiceState::new(Utc::now());
    write_state(&status_path, &state).await;
    info!(project = %project.name, root = %project.root.display(), "watching project");

    let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
    let mut closed = false;
    while !closed {
        if pending.is_empty() {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                path = rx.recv() => match path {
                    Some(path) => {
                        pending.insert(path);
                    }
                    None => break,
                },
            }
            continue;
        }

        match tokio::time::timeout(delay, rx.recv()).await {
            Ok(Some(path)) => {
                pending.insert(path);
                continue;
            }
            Ok(None) => closed = true,
            Err(_) => {}
        }

        debug!(project = %project.name, paths = pending.len(), "changes settled");
        pending.clear();
        match engine.sync(&project).await {
            Ok(report) => {
                if state.record_report(&report, Utc::now()) {
                    write_state(&status_path, &state).await;
                }
            }
            Err(err) => {
                warn!(project = %project.name, "watcher sync failed: {err}");
                state.record_error(&err.to_string(), Utc::now());
                write_state(&status_path, &state).await;
            }
        }
    }

    drop(watcher);
    state.running = false;
    write_state(&status_path, &state).await;
    info!(project = %project.name, "watcher stopped");
    Ok(())
}

async fn write_state(path: &std::path::Path, state: &WatchServiceState) {
    let json = match serde_json::to_string_pretty(state) {
        Ok(json) => json,
        Err(err) => {
            warn!("failed to encode watcher state: {err}");
            return;
        }
    };
    if let Err(err) = write_file_atomic(path, &json, None).await {
        warn!(path = %path.display(), "failed to write watcher state: {err}");
    }
}
