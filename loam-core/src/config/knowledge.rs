//! Knowledge engine configuration types.
//!
//! These types define the resolved (non-optional) settings used by
//! `loam-knowledge`. They are created from the user-facing
//! `KnowledgeToolsSettings` TOML structs via `From`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::settings::{KnowledgeContextSettings, KnowledgeSearchSettings, KnowledgeToolsSettings};

/// Resolved knowledge engine settings (all values filled with defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSettings {
    /// Root directory of the default project.
    #[serde(default = "default_home")]
    pub home: PathBuf,
    #[serde(default = "default_project_name")]
    pub project_name: String,
    /// Override the data directory for the index DB and watcher status.
    /// When unset, `LOAM_DATA_DIR` or the XDG data dir is used.
    #[serde(default)]
    pub data_root_override: Option<PathBuf>,
    #[serde(default)]
    pub knowledge_db_path_override: Option<PathBuf>,
    #[serde(default)]
    pub watch_status_path_override: Option<PathBuf>,
    #[serde(default = "default_sync_delay_ms")]
    pub sync_delay_ms: u64,
    #[serde(default)]
    pub search: SearchDefaults,
    #[serde(default)]
    pub context: ContextDefaults,
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            home: default_home(),
            project_name: default_project_name(),
            data_root_override: None,
            knowledge_db_path_override: None,
            watch_status_path_override: None,
            sync_delay_ms: default_sync_delay_ms(),
            search: SearchDefaults::default(),
            context: ContextDefaults::default(),
        }
    }
}

/// Resolved search tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDefaults {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
    /// Length of the display snippet stored next to the tokenized content.
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

/// Resolved graph context knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDefaults {
    #[serde(default = "default_depth")]
    pub depth: u8,
    #[serde(default = "default_max_depth")]
    pub max_depth: u8,
    /// Cap on related items gathered per primary result.
    #[serde(default = "default_max_related")]
    pub max_related: usize,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
}

impl Default for ContextDefaults {
    fn default() -> Self {
        Self {
            depth: default_depth(),
            max_depth: default_max_depth(),
            max_related: default_max_related(),
            timeframe: default_timeframe(),
        }
    }
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join("loam"))
        .unwrap_or_else(|| PathBuf::from("loam"))
}

fn default_project_name() -> String {
    "main".to_string()
}

fn default_sync_delay_ms() -> u64 {
    1000
}

fn default_page_size() -> usize {
    10
}

fn default_max_page_size() -> usize {
    100
}

fn default_snippet_chars() -> usize {
    250
}

fn default_depth() -> u8 {
    1
}

fn default_max_depth() -> u8 {
    3
}

fn default_max_related() -> usize {
    10
}

fn default_timeframe() -> String {
    "7d".to_string()
}

/// Expand a leading `~/` against the home directory.
fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

impl From<&KnowledgeToolsSettings> for KnowledgeSettings {
    fn from(value: &KnowledgeToolsSettings) -> Self {
        let mut settings = KnowledgeSettings::default();
        if let Some(home) = &value.home {
            settings.home = expand_home(home);
        }
        if let Some(name) = &value.project_name {
            settings.project_name = name.clone();
        }
        if let Some(path) = &value.data_root_override {
            settings.data_root_override = Some(expand_home(path));
        }
        if let Some(path) = &value.knowledge_db_path_override {
            settings.knowledge_db_path_override = Some(expand_home(path));
        }
        if let Some(path) = &value.watch_status_path_override {
            settings.watch_status_path_override = Some(expand_home(path));
        }
        if let Some(delay) = value.sync_delay_ms {
            settings.sync_delay_ms = delay;
        }
        apply_search_overrides(&mut settings.search, &value.search);
        apply_context_overrides(&mut settings.context, &value.context);
        settings
    }
}

fn apply_search_overrides(search: &mut SearchDefaults, overrides: &KnowledgeSearchSettings) {
    if let Some(page_size) = overrides.page_size {
        search.page_size = page_size;
    }
    if let Some(max_page_size) = overrides.max_page_size {
        search.max_page_size = max_page_size;
    }
    if let Some(snippet_chars) = overrides.snippet_chars {
        search.snippet_chars = snippet_chars;
    }
}

fn apply_context_overrides(context: &mut ContextDefaults, overrides: &KnowledgeContextSettings) {
    if let Some(depth) = overrides.depth {
        context.depth = depth;
    }
    if let Some(max_depth) = overrides.max_depth {
        context.max_depth = max_depth;
    }
    if let Some(max_related) = overrides.max_related {
        context.max_related = max_related;
    }
    if let Some(timeframe) = &overrides.timeframe {
        context.timeframe = timeframe.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_defaults_when_nothing_is_set() {
        let resolved = KnowledgeSettings::from(&KnowledgeToolsSettings::default());
        assert_eq!(resolved.project_name, "main");
        assert_eq!(resolved.sync_delay_ms, 1000);
        assert_eq!(resolved.search.page_size, 10);
        assert_eq!(resolved.context.depth, 1);
        assert_eq!(resolved.context.max_depth, 3);
        assert_eq!(resolved.context.timeframe, "7d");
    }

    #[test]
    fn applies_overrides() {
        let tools = KnowledgeToolsSettings {
            home: Some("/srv/notes".to_string()),
            project_name: Some("work".to_string()),
            sync_delay_ms: Some(50),
            search: KnowledgeSearchSettings {
                page_size: Some(3),
                ..Default::default()
            },
            context: KnowledgeContextSettings {
                max_related: Some(2),
                timeframe: Some("1w".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let resolved = KnowledgeSettings::from(&tools);
        assert_eq!(resolved.home, PathBuf::from("/srv/notes"));
        assert_eq!(resolved.project_name, "work");
        assert_eq!(resolved.sync_delay_ms, 50);
        assert_eq!(resolved.search.page_size, 3);
        assert_eq!(resolved.search.max_page_size, 100);
        assert_eq!(resolved.context.max_related, 2);
        assert_eq!(resolved.context.timeframe, "1w");
    }
}
