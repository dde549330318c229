pub mod document;
pub mod models;
pub mod queries;

use models::Sample;
use rusqlite::Connection;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use document::{DocumentError, DocumentStore};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Corrupt row for sample {id}: {message}")]
    CorruptRow { id: String, message: String },
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Load/save contract shared by every persistence backend.
///
/// `load` never fails: a missing or unreadable store is an empty library.
/// `save` replaces the whole persisted sample set.
pub trait SampleStore {
    type Error: std::error::Error;

    fn load(&self) -> Vec<Sample>;
    fn save(&self, samples: &[Sample]) -> std::result::Result<(), Self::Error>;
}

/// Embedded relational backend.
pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: one row per sample, keyed by id.
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS samples (
                id                TEXT PRIMARY KEY NOT NULL,
                position          INTEGER NOT NULL,
                path              TEXT NOT NULL,
                tags              TEXT NOT NULL DEFAULT '',
                created_at        TEXT NOT NULL,

                -- Probed metadata, each independently nullable
                duration_seconds  REAL,
                sample_rate       REAL,
                bit_depth         INTEGER,
                format            TEXT,
                file_created      TEXT,
                file_size_bytes   INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_samples_position ON samples(position);
            ",
        )?;
        Ok(())
    }
}

const SCHEMA_VERSION: i32 = 1;

impl SampleStore for Database {
    type Error = DbError;

    fn load(&self) -> Vec<Sample> {
        match self.load_samples() {
            Ok(samples) => samples,
            Err(e) => {
                log::warn!("Could not load samples from database: {}", e);
                Vec::new()
            }
        }
    }

    fn save(&self, samples: &[Sample]) -> Result<()> {
        self.replace_samples(samples)
    }
}

/// Which backend a library file uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Json,
    Sqlite,
}

impl BackendKind {
    pub fn default_file_name(&self) -> &'static str {
        match self {
            Self::Json => "library.json",
            Self::Sqlite => "library.db",
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Runtime-selected persistence backend.
pub enum Store {
    Document(DocumentStore),
    Sqlite(Database),
}

impl Store {
    pub fn open(kind: BackendKind, path: &Path) -> std::result::Result<Self, StoreError> {
        match kind {
            BackendKind::Json => Ok(Self::Document(DocumentStore::new(path))),
            BackendKind::Sqlite => Ok(Self::Sqlite(Database::open(path)?)),
        }
    }

    pub fn in_memory() -> std::result::Result<Self, StoreError> {
        Ok(Self::Sqlite(Database::open_in_memory()?))
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Document(_) => BackendKind::Json,
            Self::Sqlite(_) => BackendKind::Sqlite,
        }
    }

    pub fn location(&self) -> Option<PathBuf> {
        match self {
            Self::Document(doc) => Some(doc.path().to_path_buf()),
            Self::Sqlite(db) => db.conn.path().filter(|p| !p.is_empty()).map(PathBuf::from),
        }
    }
}

impl SampleStore for Store {
    type Error = StoreError;

    fn load(&self) -> Vec<Sample> {
        match self {
            Self::Document(doc) => doc.load(),
            Self::Sqlite(db) => db.load(),
        }
    }

    fn save(&self, samples: &[Sample]) -> std::result::Result<(), StoreError> {
        match self {
            Self::Document(doc) => doc.save(samples)?,
            Self::Sqlite(db) => db.save(samples)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Sample;
    use chrono::{TimeZone, Utc};

    pub(crate) fn full_sample() -> Sample {
        let mut s = Sample::new("/lib/drums/kick.wav", vec!["drums".into(), "live".into()]);
        s.duration_seconds = Some(2.5);
        s.sample_rate = Some(48000.0);
        s.bit_depth = Some(24);
        s.format = Some("wav".into());
        s.file_created = Some(Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 5).unwrap());
        s.file_size_bytes = Some(720_044);
        s
    }

    pub(crate) fn bare_sample() -> Sample {
        Sample::new("/lib/fx/riser.ogg", vec![])
    }

    #[test]
    fn test_store_backends_are_interchangeable() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![full_sample(), bare_sample()];

        let json = Store::open(BackendKind::Json, &dir.path().join("lib.json")).unwrap();
        json.save(&samples).unwrap();
        let from_json = json.load();

        let sqlite = Store::open(BackendKind::Sqlite, &dir.path().join("lib.db")).unwrap();
        sqlite.save(&from_json).unwrap();
        let from_sqlite = sqlite.load();

        assert_eq!(from_json, samples);
        assert_eq!(from_sqlite, samples);
    }

    #[test]
    fn test_store_kind_and_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.json");
        let store = Store::open(BackendKind::Json, &path).unwrap();
        assert_eq!(store.kind(), BackendKind::Json);
        assert_eq!(store.location(), Some(path));

        let mem = Store::in_memory().unwrap();
        assert_eq!(mem.kind(), BackendKind::Sqlite);
        assert_eq!(mem.location(), None);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.db");
        {
            let db = Database::open(&path).unwrap();
            db.save(&[full_sample()]).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.load().len(), 1);
    }
}
