pub mod config;

pub use config::{
    ContextDefaults, KnowledgeSettings, LoggingSettings, SearchDefaults, Settings, SettingsError,
};
