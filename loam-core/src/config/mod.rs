//! Configuration management for loam.
//!
//! Settings live in a TOML file located at `~/.config/loam/config.toml`
//! (or `$LOAM_CONFIG_DIR/config.toml`):
//! ```toml
//! [knowledge]
//! home = "~/loam"
//! project_name = "main"
//! sync_delay_ms = 1000
//!
//! [knowledge.search]
//! page_size = 10
//!
//! [knowledge.context]
//! depth = 1
//! max_related = 10
//! timeframe = "7d"
//!
//! [logging]
//! level = "info"
//! ```

pub mod knowledge;
mod settings;

pub use knowledge::{ContextDefaults, KnowledgeSettings, SearchDefaults};
pub use settings::{
    KnowledgeContextSettings, KnowledgeSearchSettings, KnowledgeToolsSettings, LoggingSettings,
    Settings, SettingsError,
};

impl Settings {
    /// Resolved knowledge settings with every default filled in.
    pub fn knowledge_settings(&self) -> KnowledgeSettings {
        KnowledgeSettings::from(&self.knowledge)
    }
}
