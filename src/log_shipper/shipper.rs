use std::time::Duration;

use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};

use crate::catalog::{LogAction, LogEntry};
use crate::error::TomatoResult;
use crate::http::ApiClient;

const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Persistent FIFO of unshipped LogEntries plus the POST-with-backoff loop
/// that drains it (§4.5). Entirely independent of the Catalog Store's
/// sqlite file — log entries must survive a catalog wipe/resync.
pub struct LogShipper {
    pool: SqlitePool,
}

impl LogShipper {
    pub async fn open(db_path: &str) -> TomatoResult<Self> {
        let url = format!("sqlite:{db_path}?mode=rwc");
        let pool = SqlitePoolOptions::new().max_connections(2).connect(&url).await?;
        let shipper = Self { pool };
        shipper.run_migrations().await?;
        Ok(shipper)
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> TomatoResult<Self> {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await?;
        let shipper = Self { pool };
        shipper.run_migrations().await?;
        Ok(shipper)
    }

    async fn run_migrations(&self) -> TomatoResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS log_queue (
                uuid        TEXT PRIMARY KEY,
                created     TEXT NOT NULL,
                user_id     INTEGER NOT NULL,
                action      TEXT NOT NULL,
                duration_ms INTEGER,
                description TEXT NOT NULL,
                shipped     INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Enqueues a LogEntry for shipment. Safe to call concurrently with a
    /// running Sync Engine — the two never touch the same sqlite file.
    pub async fn enqueue(&self, entry: &LogEntry) -> TomatoResult<()> {
        sqlx::query(
            r#"INSERT INTO log_queue (uuid, created, user_id, action, duration_ms, description, shipped)
               VALUES (?, ?, ?, ?, ?, ?, 0)
               ON CONFLICT(uuid) DO NOTHING"#,
        )
        .bind(entry.uuid.to_string())
        .bind(entry.created.to_rfc3339())
        .bind(entry.user_id)
        .bind(entry.action.as_str())
        .bind(entry.duration_ms)
        .bind(&entry.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unshipped_batch(&self) -> TomatoResult<Vec<LogEntry>> {
        let rows = sqlx::query("SELECT * FROM log_queue WHERE shipped = 0 ORDER BY created ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let uuid: String = r.get("uuid");
                let action: String = r.get("action");
                Some(LogEntry {
                    uuid: uuid.parse().ok()?,
                    created: chrono::DateTime::parse_from_rfc3339(&r.get::<String, _>("created"))
                        .ok()?
                        .with_timezone(&chrono::Utc),
                    user_id: r.get("user_id"),
                    action: action_from_str(&action)?,
                    duration_ms: r.get("duration_ms"),
                    description: r.get("description"),
                })
            })
            .collect())
    }

    async fn mark_shipped(&self, uuids: &[uuid::Uuid]) -> TomatoResult<()> {
        let mut tx = self.pool.begin().await?;
        for uuid in uuids {
            sqlx::query("UPDATE log_queue SET shipped = 1 WHERE uuid = ?")
                .bind(uuid.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Drains the queue in one pass: POSTs the full unshipped batch to
    /// `/log`, retrying with exponential backoff (1s, 2s, 4s, ... capped at
    /// 60s) until a 2xx is received. On `AccessDenied` it stops retrying
    /// immediately and returns the error so the caller can pause shipping
    /// and signal Auth (§4.5, §7).
    pub async fn ship_pending(&self, client: &ApiClient, auth_token: &str) -> TomatoResult<usize> {
        let batch = self.unshipped_batch().await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut backoff = BACKOFF_START;
        loop {
            let response = client.post("log", Some(auth_token)).json(&batch).send().await;
            match response {
                Ok(resp) if resp.status().is_success() => {
                    let uuids: Vec<_> = batch.iter().map(|e| e.uuid).collect();
                    self.mark_shipped(&uuids).await?;
                    log::info!("log shipper: shipped {} entries", batch.len());
                    return Ok(batch.len());
                }
                Ok(resp) if resp.status().as_u16() == 403 => {
                    log::error!("log shipper: access denied, pausing shipment");
                    return Err(ApiClient::classify_status(resp.status()).unwrap());
                }
                _ => {
                    log::warn!("log shipper: batch post failed, retrying in {:?}", backoff);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }
    }
}

fn action_from_str(s: &str) -> Option<LogAction> {
    Some(match s {
        "played_asset" => LogAction::PlayedAsset,
        "skipped_asset" => LogAction::SkippedAsset,
        "played_stopset" => LogAction::PlayedStopset,
        "partial_stopset" => LogAction::PlayedPartialStopset,
        "skipped_stopset" => LogAction::SkippedStopset,
        "waited" => LogAction::Waited,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueueing_the_same_uuid_twice_is_idempotent() {
        let shipper = LogShipper::open_in_memory().await.unwrap();
        let entry = LogEntry::new(1, LogAction::PlayedAsset, Some(5000), "asset 1");

        shipper.enqueue(&entry).await.unwrap();
        shipper.enqueue(&entry).await.unwrap();

        let batch = shipper.unshipped_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
    }
}
