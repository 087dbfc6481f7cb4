use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("missing data directory")]
    MissingDataDir,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
    #[error("file {path} changed on disk (expected checksum {expected}, found {actual})")]
    DirtyFile {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("invalid search query: {0}")]
    InvalidQuery(String),
    #[error("invalid timeframe: {0}")]
    InvalidTimeframe(String),
    #[error("unknown project: {0}")]
    UnknownProject(String),
    #[error("path outside allowed root: {0}")]
    PathOutsideRoot(PathBuf),
}

impl KnowledgeError {
    /// Map a sqlx error to `Integrity` when it is a UNIQUE/foreign key violation.
    pub(crate) fn from_write(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(db) = &err
            && (db.is_unique_violation() || db.is_foreign_key_violation())
        {
            return KnowledgeError::Integrity(format!("{what}: {}", db.message()));
        }
        KnowledgeError::Sqlx(err)
    }

    /// Whether this error is an integrity violation rejected at the store boundary.
    pub fn is_integrity(&self) -> bool {
        matches!(self, KnowledgeError::Integrity(_))
    }
}

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;
