//! Per (user, image, kind) annotation records.
//!
//! The merge service only reads and writes these records through
//! [`ActionRepository`]; who owns the storage is up to the caller.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Mutex,
};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// Action kind used for mask annotations.
pub const SEGMENTATION_KIND: &str = "segmentation";

/// Identity of an action record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionKey {
    pub user_id: String,
    pub image_id: String,
    pub kind: String,
}

impl ActionKey {
    pub fn segmentation(user_id: impl Into<String>, image_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            image_id: image_id.into(),
            kind: SEGMENTATION_KIND.to_string(),
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.image_id, self.user_id)
    }
}

/// Agreement and progress of one user on one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationAction {
    pub user_id: String,
    pub image_id: String,
    pub kind: String,
    /// Agreement percentage from the latest merge.
    pub score: Option<i64>,
    pub complete: bool,
    pub unverified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modification: OffsetDateTime,
}

impl AnnotationAction {
    /// Fresh record for `key`, stamped `now`.
    pub fn new(key: &ActionKey, now: OffsetDateTime) -> Self {
        Self {
            user_id: key.user_id.clone(),
            image_id: key.image_id.clone(),
            kind: key.kind.clone(),
            score: None,
            complete: false,
            unverified: true,
            last_modification: now,
        }
    }

    pub fn key(&self) -> ActionKey {
        ActionKey {
            user_id: self.user_id.clone(),
            image_id: self.image_id.clone(),
            kind: self.kind.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Action {0} already exists")]
    AlreadyExists(ActionKey),
    #[error("Action {0} does not exist")]
    Missing(ActionKey),
    #[error("Action store lock was poisoned")]
    Poisoned,
    #[error("Stored timestamp {0} is out of range")]
    InvalidTimestamp(i64),
    #[error("Could not create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Database query failed: {0}")]
    Sql(#[from] rusqlite::Error),
}

/// Storage for annotation actions keyed by (user, image, kind).
pub trait ActionRepository: Send + Sync {
    fn get(&self, key: &ActionKey) -> Result<Option<AnnotationAction>, ActionError>;

    /// All actions of `kind` on `image_id`, ordered by user id.
    fn find_for_image(
        &self,
        image_id: &str,
        kind: &str,
    ) -> Result<Vec<AnnotationAction>, ActionError>;

    fn create(&self, action: &AnnotationAction) -> Result<(), ActionError>;

    fn update(&self, action: &AnnotationAction) -> Result<(), ActionError>;

    /// Create the action or replace the stored one.
    fn save(&self, action: &AnnotationAction) -> Result<(), ActionError> {
        if self.get(&action.key())?.is_some() {
            self.update(action)
        } else {
            self.create(action)
        }
    }
}

/// Process-local repository.
#[derive(Debug, Default)]
pub struct InMemoryActions {
    actions: Mutex<BTreeMap<ActionKey, AnnotationAction>>,
}

impl InMemoryActions {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<ActionKey, AnnotationAction>>, ActionError> {
        self.actions.lock().map_err(|_| ActionError::Poisoned)
    }
}

impl ActionRepository for InMemoryActions {
    fn get(&self, key: &ActionKey) -> Result<Option<AnnotationAction>, ActionError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn find_for_image(
        &self,
        image_id: &str,
        kind: &str,
    ) -> Result<Vec<AnnotationAction>, ActionError> {
        Ok(self
            .lock()?
            .values()
            .filter(|action| action.image_id == image_id && action.kind == kind)
            .cloned()
            .collect())
    }

    fn create(&self, action: &AnnotationAction) -> Result<(), ActionError> {
        let mut actions = self.lock()?;
        let key = action.key();
        if actions.contains_key(&key) {
            return Err(ActionError::AlreadyExists(key));
        }
        actions.insert(key, action.clone());
        Ok(())
    }

    fn update(&self, action: &AnnotationAction) -> Result<(), ActionError> {
        let mut actions = self.lock()?;
        let key = action.key();
        match actions.get_mut(&key) {
            Some(slot) => {
                *slot = action.clone();
                Ok(())
            }
            None => Err(ActionError::Missing(key)),
        }
    }
}

/// SQLite-backed repository.
pub struct SqliteActions {
    connection: Mutex<Connection>,
}

impl SqliteActions {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, ActionError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ActionError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    /// Database that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self, ActionError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(connection: Connection) -> Result<Self, ActionError> {
        connection.execute_batch(
            "PRAGMA busy_timeout=5000;
             CREATE TABLE IF NOT EXISTS actions (
                user_id TEXT NOT NULL,
                image_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                score INTEGER,
                complete INTEGER NOT NULL DEFAULT 0,
                unverified INTEGER NOT NULL DEFAULT 1,
                last_modification INTEGER NOT NULL,
                PRIMARY KEY (user_id, image_id, kind)
             ) WITHOUT ROWID;
             CREATE INDEX IF NOT EXISTS idx_actions_image_kind
                ON actions (image_id, kind);",
        )?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ActionError> {
        self.connection.lock().map_err(|_| ActionError::Poisoned)
    }
}

type ActionRow = (String, String, String, Option<i64>, i64, i64, i64);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_action(row: ActionRow) -> Result<AnnotationAction, ActionError> {
    let (user_id, image_id, kind, score, complete, unverified, timestamp) = row;
    let last_modification = OffsetDateTime::from_unix_timestamp(timestamp)
        .map_err(|_| ActionError::InvalidTimestamp(timestamp))?;
    Ok(AnnotationAction {
        user_id,
        image_id,
        kind,
        score,
        complete: complete != 0,
        unverified: unverified != 0,
        last_modification,
    })
}

const SELECT_COLUMNS: &str =
    "SELECT user_id, image_id, kind, score, complete, unverified, last_modification FROM actions";

impl ActionRepository for SqliteActions {
    fn get(&self, key: &ActionKey) -> Result<Option<AnnotationAction>, ActionError> {
        let connection = self.lock()?;
        let mut stmt = connection.prepare_cached(&format!(
            "{SELECT_COLUMNS} WHERE user_id = ?1 AND image_id = ?2 AND kind = ?3"
        ))?;
        let row = stmt
            .query_row(params![key.user_id, key.image_id, key.kind], read_row)
            .optional()?;
        row.map(into_action).transpose()
    }

    fn find_for_image(
        &self,
        image_id: &str,
        kind: &str,
    ) -> Result<Vec<AnnotationAction>, ActionError> {
        let connection = self.lock()?;
        let mut stmt = connection.prepare_cached(&format!(
            "{SELECT_COLUMNS} WHERE image_id = ?1 AND kind = ?2 ORDER BY user_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![image_id, kind], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_action).collect()
    }

    fn create(&self, action: &AnnotationAction) -> Result<(), ActionError> {
        let connection = self.lock()?;
        let inserted = connection.execute(
            "INSERT INTO actions (user_id, image_id, kind, score, complete, unverified, last_modification)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, image_id, kind) DO NOTHING",
            params![
                action.user_id,
                action.image_id,
                action.kind,
                action.score,
                action.complete as i64,
                action.unverified as i64,
                action.last_modification.unix_timestamp()
            ],
        )?;
        if inserted == 0 {
            return Err(ActionError::AlreadyExists(action.key()));
        }
        Ok(())
    }

    fn update(&self, action: &AnnotationAction) -> Result<(), ActionError> {
        let connection = self.lock()?;
        let updated = connection.execute(
            "UPDATE actions SET score = ?4, complete = ?5, unverified = ?6, last_modification = ?7
             WHERE user_id = ?1 AND image_id = ?2 AND kind = ?3",
            params![
                action.user_id,
                action.image_id,
                action.kind,
                action.score,
                action.complete as i64,
                action.unverified as i64,
                action.last_modification.unix_timestamp()
            ],
        )?;
        if updated == 0 {
            return Err(ActionError::Missing(action.key()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn action(user: &str, image: &str) -> AnnotationAction {
        AnnotationAction::new(
            &ActionKey::segmentation(user, image),
            datetime!(2024-05-01 12:00:00 UTC),
        )
    }

    fn exercise(repo: &dyn ActionRepository) {
        let mut first = action("alice", "img1");
        repo.create(&first).unwrap();
        assert!(matches!(
            repo.create(&first),
            Err(ActionError::AlreadyExists(_))
        ));
        repo.create(&action("bob", "img1")).unwrap();
        repo.create(&action("alice", "img2")).unwrap();

        first.score = Some(87);
        first.complete = true;
        first.unverified = false;
        repo.update(&first).unwrap();
        assert_eq!(repo.get(&first.key()).unwrap(), Some(first.clone()));

        let users: Vec<String> = repo
            .find_for_image("img1", SEGMENTATION_KIND)
            .unwrap()
            .into_iter()
            .map(|a| a.user_id)
            .collect();
        assert_eq!(users, vec!["alice", "bob"]);
        assert!(repo.find_for_image("img1", "other").unwrap().is_empty());

        assert!(matches!(
            repo.update(&action("carol", "img1")),
            Err(ActionError::Missing(_))
        ));
        repo.save(&action("carol", "img1")).unwrap();
        assert!(repo.get(&ActionKey::segmentation("carol", "img1")).unwrap().is_some());
    }

    #[test]
    fn in_memory_repository_roundtrip() {
        exercise(&InMemoryActions::new());
    }

    #[test]
    fn sqlite_repository_roundtrip() {
        exercise(&SqliteActions::open_in_memory().unwrap());
    }

    #[test]
    fn sqlite_repository_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("actions.db");
        {
            let repo = SqliteActions::open(&path).unwrap();
            repo.create(&action("alice", "img1")).unwrap();
        }
        let repo = SqliteActions::open(&path).unwrap();
        let stored = repo
            .get(&ActionKey::segmentation("alice", "img1"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.last_modification, datetime!(2024-05-01 12:00:00 UTC));
    }
}
