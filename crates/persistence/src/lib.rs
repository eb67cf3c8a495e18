#![deny(warnings)]

//! Save slots for store snapshots, kept in SQLite.
//!
//! A save is a named slot; each call to [`save_snapshot`] appends a JSON
//! image of the whole store to it, and [`load_latest_snapshot`] reads the
//! newest one back.

use chrono::{DateTime, Utc};
use lab_core::StoreSnapshot;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("snapshot encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("bad timestamp in save data: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("save {0} not found")]
    SaveNotFound(i64),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Returns the default SQLite URL used for local saves.
pub fn default_sqlite_url() -> &'static str {
    "sqlite://./saves/main.db"
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SaveSlot {
    pub id: i64,
    pub name: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub snapshots: i64,
}

/// Open (creating if needed) the database at `url` and run migrations.
pub async fn init_db(url: &str) -> PersistenceResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);
    // one connection so that `sqlite::memory:` keeps a single database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    debug!(url, "database ready");
    Ok(pool)
}

/// Create a save slot, or return the id of the existing one with that name.
pub async fn create_save(pool: &SqlitePool, name: &str, note: Option<&str>) -> PersistenceResult<i64> {
    if let Some(row) = sqlx::query("SELECT id FROM saves WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?
    {
        return Ok(row.try_get("id")?);
    }
    let result = sqlx::query("INSERT INTO saves (name, note, created_at) VALUES (?, ?, ?)")
        .bind(name)
        .bind(note)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;
    let id = result.last_insert_rowid();
    info!(save = id, name, "save slot created");
    Ok(id)
}

/// Append `snapshot` to save `save_id`. Returns the snapshot row id.
pub async fn save_snapshot(
    pool: &SqlitePool,
    save_id: i64,
    snapshot: &StoreSnapshot,
) -> PersistenceResult<i64> {
    let exists = sqlx::query("SELECT 1 FROM saves WHERE id = ?")
        .bind(save_id)
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(PersistenceError::SaveNotFound(save_id));
    }
    let body = snapshot.to_json()?;
    let result = sqlx::query(
        "INSERT INTO snapshots (save_id, taken_at, owner_count, next_job_id, body) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(save_id)
    .bind(Utc::now().to_rfc3339())
    .bind(snapshot.owners.len() as i64)
    .bind(snapshot.next_job_id as i64)
    .bind(body)
    .execute(pool)
    .await?;
    info!(save = save_id, owners = snapshot.owners.len(), "snapshot saved");
    Ok(result.last_insert_rowid())
}

/// Newest snapshot of save `save_id`, if any was written.
pub async fn load_latest_snapshot(
    pool: &SqlitePool,
    save_id: i64,
) -> PersistenceResult<Option<StoreSnapshot>> {
    let row = sqlx::query("SELECT body FROM snapshots WHERE save_id = ? ORDER BY id DESC LIMIT 1")
        .bind(save_id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => {
            let body: String = row.try_get("body")?;
            Ok(Some(StoreSnapshot::from_json(&body)?))
        }
        None => Ok(None),
    }
}

pub async fn list_saves(pool: &SqlitePool) -> PersistenceResult<Vec<SaveSlot>> {
    let rows = sqlx::query(
        "SELECT s.id, s.name, s.note, s.created_at, COUNT(n.id) AS snapshots \
         FROM saves s LEFT JOIN snapshots n ON n.save_id = s.id \
         GROUP BY s.id ORDER BY s.id",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| -> PersistenceResult<SaveSlot> {
            let created: String = row.try_get("created_at")?;
            Ok(SaveSlot {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                note: row.try_get("note")?,
                created_at: DateTime::parse_from_rfc3339(&created)?.with_timezone(&Utc),
                snapshots: row.try_get("snapshots")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lab_core::{FounderId, OwnerId, OwnerRecord, OwnerState};

    fn snapshot(next: u64) -> StoreSnapshot {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut state = OwnerState::new(OwnerId::new("p"), FounderId::new("hacker"), created);
        state.pool.currency = 1_234;
        StoreSnapshot {
            owners: vec![OwnerRecord::new(state)],
            next_job_id: next,
            ..StoreSnapshot::default()
        }
    }

    #[test]
    fn url_is_sqlite() {
        assert!(default_sqlite_url().starts_with("sqlite://"));
    }

    #[tokio::test]
    async fn latest_snapshot_wins() {
        let pool = init_db("sqlite::memory:").await.unwrap();
        let save = create_save(&pool, "main", Some("first run")).await.unwrap();
        assert_eq!(load_latest_snapshot(&pool, save).await.unwrap(), None);

        save_snapshot(&pool, save, &snapshot(5)).await.unwrap();
        save_snapshot(&pool, save, &snapshot(9)).await.unwrap();
        let loaded = load_latest_snapshot(&pool, save).await.unwrap().unwrap();
        assert_eq!(loaded, snapshot(9));
        assert_eq!(loaded.owners[0].state.pool.currency, 1_234);
    }

    #[tokio::test]
    async fn save_names_are_reused() {
        let pool = init_db("sqlite::memory:").await.unwrap();
        let a = create_save(&pool, "main", None).await.unwrap();
        let b = create_save(&pool, "main", Some("ignored")).await.unwrap();
        assert_eq!(a, b);
        create_save(&pool, "alt", None).await.unwrap();
        save_snapshot(&pool, a, &snapshot(1)).await.unwrap();

        let saves = list_saves(&pool).await.unwrap();
        assert_eq!(saves.len(), 2);
        assert_eq!((saves[0].name.as_str(), saves[0].snapshots), ("main", 1));
        assert_eq!((saves[1].name.as_str(), saves[1].snapshots), ("alt", 0));
    }

    #[tokio::test]
    async fn unknown_save_is_rejected() {
        let pool = init_db("sqlite::memory:").await.unwrap();
        assert!(matches!(
            save_snapshot(&pool, 77, &snapshot(1)).await,
            Err(PersistenceError::SaveNotFound(77))
        ));
    }
}
