use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};

use crate::error::TomatoResult;

use super::models::{
    Asset, AudioFile, Eligibility, ExportSnapshot, Rotator, RotatorColor, RotatorSlot,
    StationConfig, StopSet,
};

/// Owns the client's local mirror of the server catalog (§3, §4.1). Every
/// read the Block Generator and Playout Controller perform goes through
/// here; every write comes from `apply_snapshot` (Sync Engine) or
/// `record_log` (Log Shipper queue is separate, see `log_shipper`).
#[derive(Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    pub async fn open(db_path: &str) -> TomatoResult<Self> {
        let url = format!("sqlite:{db_path}?mode=rwc");
        let pool = SqlitePoolOptions::new().max_connections(4).connect(&url).await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> TomatoResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> TomatoResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rotators (
                id    INTEGER PRIMARY KEY,
                name  TEXT NOT NULL,
                color TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stopsets (
                id      INTEGER PRIMARY KEY,
                name    TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                begin   TEXT,
                end     TEXT,
                weight  REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rotator_slots (
                id          INTEGER PRIMARY KEY,
                stopset_id  INTEGER NOT NULL REFERENCES stopsets(id) ON DELETE CASCADE,
                rotator_id  INTEGER NOT NULL REFERENCES rotators(id) ON DELETE CASCADE,
                position    INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS assets (
                id              INTEGER PRIMARY KEY,
                name            TEXT NOT NULL,
                duration_ms     INTEGER NOT NULL,
                audio_rel_path  TEXT NOT NULL,
                audio_size      INTEGER NOT NULL,
                enabled         INTEGER NOT NULL,
                begin           TEXT,
                end             TEXT,
                weight          REAL NOT NULL
            );

            -- explicit join table, per Design Note §9: the many-to-many
            -- Asset<->Rotator relation is modeled here rather than left to
            -- ORM-implicit cascade behavior.
            CREATE TABLE IF NOT EXISTS asset_rotators (
                asset_id   INTEGER NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
                rotator_id INTEGER NOT NULL REFERENCES rotators(id) ON DELETE CASCADE,
                PRIMARY KEY (asset_id, rotator_id)
            );

            CREATE TABLE IF NOT EXISTS station_config (
                id                                      INTEGER PRIMARY KEY CHECK (id = 1),
                timezone                                TEXT NOT NULL,
                wait_interval_minutes                   INTEGER NOT NULL,
                wait_interval_subtracts_stopset_playtime INTEGER NOT NULL,
                fade_assets_ms                           INTEGER NOT NULL,
                clickable_waveform                       INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Apply a full `/export` snapshot in one transaction (§4.2 step 5):
    /// upsert every object present, delete every row absent from the
    /// snapshot. Never runs half-applied — a failure mid-transaction leaves
    /// the previous catalog state intact.
    pub async fn apply_snapshot(&self, snapshot: &ExportSnapshot) -> TomatoResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM rotator_slots").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM asset_rotators").execute(&mut *tx).await?;
        sqlx::query(
            "DELETE FROM assets WHERE id NOT IN (SELECT value FROM json_each(?))",
        )
        .bind(serde_json::to_string(&snapshot.assets.iter().map(|a| a.id).collect::<Vec<_>>()).unwrap())
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM stopsets WHERE id NOT IN (SELECT value FROM json_each(?))",
        )
        .bind(serde_json::to_string(&snapshot.stopsets.iter().map(|s| s.id).collect::<Vec<_>>()).unwrap())
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM rotators WHERE id NOT IN (SELECT value FROM json_each(?))",
        )
        .bind(serde_json::to_string(&snapshot.rotators.iter().map(|r| r.id).collect::<Vec<_>>()).unwrap())
        .execute(&mut *tx)
        .await?;

        for rotator in &snapshot.rotators {
            sqlx::query(
                r#"INSERT INTO rotators (id, name, color) VALUES (?, ?, ?)
                   ON CONFLICT(id) DO UPDATE SET name = excluded.name, color = excluded.color"#,
            )
            .bind(rotator.id)
            .bind(&rotator.name)
            .bind(rotator.color.as_str())
            .execute(&mut *tx)
            .await?;
        }

        for stopset in &snapshot.stopsets {
            sqlx::query(
                r#"INSERT INTO stopsets (id, name, enabled, begin, end, weight) VALUES (?, ?, ?, ?, ?, ?)
                   ON CONFLICT(id) DO UPDATE SET name = excluded.name, enabled = excluded.enabled,
                       begin = excluded.begin, end = excluded.end, weight = excluded.weight"#,
            )
            .bind(stopset.id)
            .bind(&stopset.name)
            .bind(stopset.eligibility.enabled)
            .bind(stopset.eligibility.begin.map(|d| d.to_rfc3339()))
            .bind(stopset.eligibility.end.map(|d| d.to_rfc3339()))
            .bind(stopset.weight)
            .execute(&mut *tx)
            .await?;
        }

        for asset in &snapshot.assets {
            sqlx::query(
                r#"INSERT INTO assets (id, name, duration_ms, audio_rel_path, audio_size, enabled, begin, end, weight)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT(id) DO UPDATE SET name = excluded.name, duration_ms = excluded.duration_ms,
                       audio_rel_path = excluded.audio_rel_path, audio_size = excluded.audio_size,
                       enabled = excluded.enabled, begin = excluded.begin, end = excluded.end, weight = excluded.weight"#,
            )
            .bind(asset.id)
            .bind(&asset.name)
            .bind(asset.duration_ms)
            .bind(&asset.audio.relative_path)
            .bind(asset.audio.audio_size)
            .bind(asset.eligibility.enabled)
            .bind(asset.eligibility.begin.map(|d| d.to_rfc3339()))
            .bind(asset.eligibility.end.map(|d| d.to_rfc3339()))
            .bind(asset.weight)
            .execute(&mut *tx)
            .await?;

            for rotator_id in &asset.rotator_ids {
                sqlx::query(
                    "INSERT OR IGNORE INTO asset_rotators (asset_id, rotator_id) VALUES (?, ?)",
                )
                .bind(asset.id)
                .bind(rotator_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        for slot in &snapshot.slots {
            sqlx::query(
                "INSERT INTO rotator_slots (id, stopset_id, rotator_id, position) VALUES (?, ?, ?, ?)",
            )
            .bind(slot.id)
            .bind(slot.stopset_id)
            .bind(slot.rotator_id)
            .bind(slot.position)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"INSERT INTO station_config (id, timezone, wait_interval_minutes,
                   wait_interval_subtracts_stopset_playtime, fade_assets_ms, clickable_waveform)
               VALUES (1, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET timezone = excluded.timezone,
                   wait_interval_minutes = excluded.wait_interval_minutes,
                   wait_interval_subtracts_stopset_playtime = excluded.wait_interval_subtracts_stopset_playtime,
                   fade_assets_ms = excluded.fade_assets_ms, clickable_waveform = excluded.clickable_waveform"#,
        )
        .bind(&snapshot.conf.timezone)
        .bind(snapshot.conf.wait_interval_minutes)
        .bind(snapshot.conf.wait_interval_subtracts_stopset_playtime)
        .bind(snapshot.conf.fade_assets_ms)
        .bind(snapshot.conf.clickable_waveform)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn config(&self) -> TomatoResult<StationConfig> {
        let row = sqlx::query("SELECT * FROM station_config WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(r) => StationConfig {
                timezone: r.get("timezone"),
                wait_interval_minutes: r.get("wait_interval_minutes"),
                wait_interval_subtracts_stopset_playtime: r
                    .get::<i64, _>("wait_interval_subtracts_stopset_playtime")
                    != 0,
                fade_assets_ms: r.get("fade_assets_ms"),
                clickable_waveform: r.get::<i64, _>("clickable_waveform") != 0,
            }
            .sanitize(),
            None => StationConfig::default(),
        })
    }

    fn row_to_asset(row: &sqlx::sqlite::SqliteRow, rotator_ids: Vec<i64>) -> Asset {
        Asset {
            id: row.get("id"),
            name: row.get("name"),
            duration_ms: row.get("duration_ms"),
            audio: AudioFile {
                relative_path: row.get("audio_rel_path"),
                audio_size: row.get("audio_size"),
            },
            eligibility: Eligibility {
                enabled: row.get::<i64, _>("enabled") != 0,
                begin: row
                    .get::<Option<String>, _>("begin")
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|d| d.with_timezone(&Utc)),
                end: row
                    .get::<Option<String>, _>("end")
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|d| d.with_timezone(&Utc)),
            },
            weight: row.get("weight"),
            rotator_ids,
        }
    }

    /// Assets attached to `rotator_id` that are `currently_enabled` at `at`
    /// (§3-inv-4, used by the Block Generator's per-rotator pools).
    pub async fn currently_enabled_assets_for_rotator(
        &self,
        rotator_id: i64,
        at: DateTime<Utc>,
    ) -> TomatoResult<Vec<Asset>> {
        let rows = sqlx::query(
            r#"SELECT a.* FROM assets a
               JOIN asset_rotators ar ON ar.asset_id = a.id
               WHERE ar.rotator_id = ? AND a.enabled = 1
                 AND (a.begin IS NULL OR a.begin <= ?)
                 AND (a.end IS NULL OR a.end >= ?)"#,
        )
        .bind(rotator_id)
        .bind(at.to_rfc3339())
        .bind(at.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        let mut assets = Vec::with_capacity(rows.len());
        for row in &rows {
            let asset_id: i64 = row.get("id");
            let rotator_ids = self.rotator_ids_for_asset(asset_id).await?;
            assets.push(Self::row_to_asset(row, rotator_ids));
        }
        Ok(assets)
    }

    async fn rotator_ids_for_asset(&self, asset_id: i64) -> TomatoResult<Vec<i64>> {
        let rows = sqlx::query("SELECT rotator_id FROM asset_rotators WHERE asset_id = ?")
            .bind(asset_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get("rotator_id")).collect())
    }

    /// StopSets currently enabled at `at` (§3-inv-4), for the Block
    /// Generator's weighted-random StopSet pick.
    pub async fn currently_enabled_stopsets(&self, at: DateTime<Utc>) -> TomatoResult<Vec<StopSet>> {
        let rows = sqlx::query(
            r#"SELECT * FROM stopsets WHERE enabled = 1
               AND (begin IS NULL OR begin <= ?) AND (end IS NULL OR end >= ?)"#,
        )
        .bind(at.to_rfc3339())
        .bind(at.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StopSet {
                id: r.get("id"),
                name: r.get("name"),
                eligibility: Eligibility {
                    enabled: r.get::<i64, _>("enabled") != 0,
                    begin: r
                        .get::<Option<String>, _>("begin")
                        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                        .map(|d| d.with_timezone(&Utc)),
                    end: r
                        .get::<Option<String>, _>("end")
                        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                        .map(|d| d.with_timezone(&Utc)),
                },
                weight: r.get("weight"),
            })
            .collect())
    }

    /// Ordered rotator slots for a stopset, position ascending — duplicates
    /// of the same rotator are kept, matching the original's `order_by('id')`
    /// (§4.3 step 3a).
    pub async fn ordered_slots(&self, stopset_id: i64) -> TomatoResult<Vec<RotatorSlot>> {
        let rows = sqlx::query(
            "SELECT * FROM rotator_slots WHERE stopset_id = ? ORDER BY position ASC",
        )
        .bind(stopset_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| RotatorSlot {
                id: r.get("id"),
                stopset_id: r.get("stopset_id"),
                rotator_id: r.get("rotator_id"),
                position: r.get("position"),
            })
            .collect())
    }

    pub async fn rotator(&self, rotator_id: i64) -> TomatoResult<Option<Rotator>> {
        let row = sqlx::query("SELECT * FROM rotators WHERE id = ?")
            .bind(rotator_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Rotator {
            id: r.get("id"),
            name: r.get("name"),
            color: RotatorColor::from_str_lenient(r.get("color")),
        }))
    }

    /// All asset ids currently on disk, for orphan cleanup at logout
    /// (§4.2, deferred from sync per the "never delete a file a handle may
    /// still hold" rule).
    pub async fn all_audio_relative_paths(&self) -> TomatoResult<Vec<String>> {
        let rows = sqlx::query("SELECT audio_rel_path FROM assets")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get("audio_rel_path")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-07-28T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn snapshot_with_one_stopset() -> ExportSnapshot {
        ExportSnapshot {
            conf: StationConfig::default(),
            media_url: "https://station.example/media/".to_string(),
            assets: vec![
                Asset {
                    id: 1,
                    name: "Jingle A".to_string(),
                    duration_ms: 5000,
                    audio: AudioFile { relative_path: "assets/1.mp3".to_string(), audio_size: 1234 },
                    eligibility: Eligibility { enabled: true, begin: None, end: None },
                    weight: 2.0,
                    rotator_ids: vec![10],
                },
                Asset {
                    id: 2,
                    name: "Jingle B".to_string(),
                    duration_ms: 4000,
                    audio: AudioFile { relative_path: "assets/2.mp3".to_string(), audio_size: 1234 },
                    eligibility: Eligibility { enabled: false, begin: None, end: None },
                    weight: 1.0,
                    rotator_ids: vec![10],
                },
            ],
            rotators: vec![Rotator { id: 10, name: "Jingles".to_string(), color: RotatorColor::Blue }],
            stopsets: vec![StopSet {
                id: 100,
                name: "Top of Hour".to_string(),
                eligibility: Eligibility { enabled: true, begin: None, end: None },
                weight: 1.0,
            }],
            slots: vec![RotatorSlot { id: 1000, stopset_id: 100, rotator_id: 10, position: 1000 }],
        }
    }

    #[tokio::test]
    async fn disabled_assets_are_excluded_from_rotator_pools() {
        let store = CatalogStore::open_in_memory().await.unwrap();
        store.apply_snapshot(&snapshot_with_one_stopset()).await.unwrap();

        let assets = store.currently_enabled_assets_for_rotator(10, now()).await.unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].id, 1);
    }

    #[tokio::test]
    async fn apply_snapshot_deletes_rows_absent_from_the_new_snapshot() {
        let store = CatalogStore::open_in_memory().await.unwrap();
        store.apply_snapshot(&snapshot_with_one_stopset()).await.unwrap();

        let mut empty = snapshot_with_one_stopset();
        empty.assets.clear();
        empty.stopsets.clear();
        empty.rotators.clear();
        empty.slots.clear();
        store.apply_snapshot(&empty).await.unwrap();

        assert!(store.currently_enabled_stopsets(now()).await.unwrap().is_empty());
        assert!(store.currently_enabled_assets_for_rotator(10, now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn config_is_sanitized_on_read() {
        let store = CatalogStore::open_in_memory().await.unwrap();
        let mut snapshot = snapshot_with_one_stopset();
        snapshot.conf.wait_interval_minutes = -5;
        snapshot.conf.timezone = "Not/AZone".to_string();
        store.apply_snapshot(&snapshot).await.unwrap();

        let conf = store.config().await.unwrap();
        assert_eq!(conf.wait_interval_minutes, 0);
        assert_eq!(conf.timezone, StationConfig::default().timezone);
    }
}
