use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{AppError, Result};
use crate::store::models::{ConfigBackupRow, ConfigEntryRow};
use crate::types::Segment;

// Well-known key layouts, one namespace per tuned parameter.

pub fn stake_fraction_key(segment: &Segment) -> String {
    format!("stake_fraction.{}", segment.key())
}

pub fn confidence_threshold_key(segment: &Segment) -> String {
    format!("confidence_threshold.{}", segment.key())
}

pub fn calibration_factors_key(segment: &Segment) -> String {
    format!("calibration_factors.{}", segment.key())
}

pub fn edge_threshold_key(segment: &Segment) -> String {
    format!("edge_threshold.{}", segment.key())
}

pub fn prob_transform_key(segment: &Segment) -> String {
    format!("prob_transform.{}", segment.key())
}

/// Versioned key-value parameter store. Values are JSON so scalar knobs and
/// factor maps share one table; every write bumps the key's version.
///
/// Backups snapshot the whole table and restore puts it back verbatim,
/// versions included. `write_with_backup` is the only write path tuning
/// uses: no snapshot, no write.
#[derive(Clone)]
pub struct ConfigStore {
    pool: sqlx::SqlitePool,
}

#[derive(Debug, Serialize, Deserialize)]
struct BackupEntry {
    key: String,
    value: Value,
    version: i64,
}

impl ConfigStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM config_entries WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((raw,)) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        Ok(self.get(key).await?.and_then(|v| v.as_f64()))
    }

    /// Upsert one key and return its new version.
    pub async fn set(&self, key: &str, value: &Value) -> Result<i64> {
        let raw = serde_json::to_string(value)?;
        let (version,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO config_entries (key, value, version, updated_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                version = config_entries.version + 1,
                updated_at = excluded.updated_at
            RETURNING version
            "#,
        )
        .bind(key)
        .bind(raw)
        .bind(now_s())
        .fetch_one(&self.pool)
        .await?;
        Ok(version)
    }

    /// Upsert a batch atomically.
    pub async fn set_many(&self, entries: &[(String, Value)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = now_s();
        for (key, value) in entries {
            let raw = serde_json::to_string(value)?;
            sqlx::query(
                r#"
                INSERT INTO config_entries (key, value, version, updated_at)
                VALUES (?, ?, 1, ?)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    version = config_entries.version + 1,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(raw)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn all(&self) -> Result<Vec<ConfigEntryRow>> {
        let rows = sqlx::query_as::<_, ConfigEntryRow>(
            "SELECT key, value, version, updated_at FROM config_entries ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Snapshot every entry under a new backup id and return the id.
    pub async fn backup(&self, label: &str) -> Result<String> {
        let entries = self.all().await?;
        let mut dump = Vec::with_capacity(entries.len());
        for row in &entries {
            dump.push(BackupEntry {
                key: row.key.clone(),
                value: serde_json::from_str(&row.value)?,
                version: row.version,
            });
        }
        let id = format!("{label}-{}", now_ns());
        sqlx::query("INSERT INTO config_backups (id, created_at, entries_json) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(now_s())
            .bind(serde_json::to_string(&dump)?)
            .execute(&self.pool)
            .await?;
        info!(backup_id = %id, entries = dump.len(), "config backup created");
        Ok(id)
    }

    /// Replace the live table with a backup's contents, verbatim.
    pub async fn restore(&self, backup_id: &str) -> Result<()> {
        let row: Option<ConfigBackupRow> = sqlx::query_as(
            "SELECT id, created_at, entries_json FROM config_backups WHERE id = ?",
        )
        .bind(backup_id)
        .fetch_optional(&self.pool)
        .await?;
        let row = row.ok_or_else(|| AppError::Backup(format!("unknown backup id {backup_id}")))?;
        let dump: Vec<BackupEntry> = serde_json::from_str(&row.entries_json)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM config_entries").execute(&mut *tx).await?;
        let now = now_s();
        for entry in &dump {
            sqlx::query(
                "INSERT INTO config_entries (key, value, version, updated_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&entry.key)
            .bind(serde_json::to_string(&entry.value)?)
            .bind(entry.version)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!(backup_id, entries = dump.len(), "config restored from backup");
        Ok(())
    }

    pub async fn list_backups(&self) -> Result<Vec<ConfigBackupRow>> {
        let rows = sqlx::query_as::<_, ConfigBackupRow>(
            "SELECT id, created_at, entries_json FROM config_backups ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Backup then write. The write never happens if the backup fails, and
    /// the returned id is the rollback handle for this write.
    pub async fn write_with_backup(
        &self,
        entries: &[(String, Value)],
        label: &str,
    ) -> Result<String> {
        let backup_id = self.backup(label).await?;
        self.set_many(entries).await?;
        Ok(backup_id)
    }
}

fn now_s() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn now_ns() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
