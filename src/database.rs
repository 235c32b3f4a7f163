use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::errors::{AppError, AppResult};
use crate::models::{CommunityRef, DestinationKind, PostStatus, Profile, StatusRecord};
use crate::session::Session;

const ACTIVE_PROFILE_KEY: &str = "active_profile_id";
const DEFAULT_PROFILE_ID: &str = "default";

/// Handle to the relay's SQLite store
#[derive(Clone, Debug)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn connect(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        log::info!("Database path: {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        db.seed_defaults().await?;

        log::info!("Database initialized successfully");
        Ok(db)
    }

    async fn init_schema(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                user_id TEXT,
                issued_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS post_status (
                shortcode TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS post_shares (
                shortcode TEXT NOT NULL,
                destination_id TEXT NOT NULL,
                shared_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (shortcode, destination_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS communities (
                position INTEGER NOT NULL,
                id TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL DEFAULT 'community'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                destination_kind TEXT NOT NULL DEFAULT 'community',
                destination_id TEXT NOT NULL DEFAULT '',
                usernames TEXT NOT NULL DEFAULT '[]',
                scrape_limit INTEGER NOT NULL DEFAULT 10
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS app_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_post_status_status ON post_status(status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn seed_defaults(&self) -> AppResult<()> {
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles")
            .fetch_one(&self.pool)
            .await?;

        if existing == 0 {
            log::info!("Seeding default profile");
            self.replace_profiles(&[Profile::default_profile()]).await?;
        }

        sqlx::query("INSERT OR IGNORE INTO app_settings (key, value) VALUES (?, ?)")
            .bind(ACTIVE_PROFILE_KEY)
            .bind(DEFAULT_PROFILE_ID)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // Session

    pub async fn load_session(&self) -> AppResult<Option<Session>> {
        let row = sqlx::query(
            "SELECT access_token, refresh_token, user_id, issued_at FROM session WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Session {
            access_token: row.get("access_token"),
            refresh_token: row.get("refresh_token"),
            user_id: row.get("user_id"),
            issued_at: row.get::<DateTime<Utc>, _>("issued_at"),
        }))
    }

    /// Replace the single persisted session
    pub async fn save_session(&self, session: &Session) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO session (id, access_token, refresh_token, user_id, issued_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                user_id = excluded.user_id,
                issued_at = excluded.issued_at
            "#,
        )
        .bind(&session.access_token)
        .bind(&session.refresh_token)
        .bind(&session.user_id)
        .bind(session.issued_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Post status

    pub async fn set_status(&self, shortcode: &str, status: PostStatus) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO post_status (shortcode, status, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(shortcode) DO UPDATE SET
                status = excluded.status,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(shortcode)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        log::debug!("Status for {} set to {}", shortcode, status);
        Ok(())
    }

    /// Move `shortcode` to `to` only if it is currently `from`.
    /// Returns whether the row was updated.
    pub async fn compare_and_set_status(
        &self,
        shortcode: &str,
        from: PostStatus,
        to: PostStatus,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE post_status SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE shortcode = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(shortcode)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark a post uploaded and remember where it went, atomically
    pub async fn record_share(&self, shortcode: &str, destination_id: &str) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO post_status (shortcode, status, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(shortcode) DO UPDATE SET
                status = excluded.status,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(shortcode)
        .bind(PostStatus::Uploaded.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT OR IGNORE INTO post_shares (shortcode, destination_id) VALUES (?, ?)",
        )
        .bind(shortcode)
        .bind(destination_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_status(&self, shortcode: &str) -> AppResult<Option<StatusRecord>> {
        let row = sqlx::query("SELECT status FROM post_status WHERE shortcode = ?")
            .bind(shortcode)
            .fetch_optional(&self.pool)
            .await?;

        let status = match row {
            Some(row) => parse_status(row.get("status"))?,
            None => return Ok(None),
        };

        let shared_to: Vec<String> = sqlx::query_scalar(
            "SELECT destination_id FROM post_shares WHERE shortcode = ? ORDER BY shared_at, destination_id",
        )
        .bind(shortcode)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(StatusRecord {
            shortcode: shortcode.to_string(),
            status,
            shared_to,
        }))
    }

    /// Every tracked status record, keyed by shortcode
    pub async fn all_statuses(&self) -> AppResult<HashMap<String, StatusRecord>> {
        let rows = sqlx::query("SELECT shortcode, status FROM post_status")
            .fetch_all(&self.pool)
            .await?;

        let mut records = HashMap::with_capacity(rows.len());
        for row in rows {
            let shortcode: String = row.get("shortcode");
            let status = parse_status(row.get("status"))?;
            records.insert(
                shortcode.clone(),
                StatusRecord {
                    shortcode,
                    status,
                    shared_to: Vec::new(),
                },
            );
        }

        let shares = sqlx::query(
            "SELECT shortcode, destination_id FROM post_shares ORDER BY shared_at, destination_id",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in shares {
            let shortcode: String = row.get("shortcode");
            if let Some(record) = records.get_mut(&shortcode) {
                record.shared_to.push(row.get("destination_id"));
            }
        }

        Ok(records)
    }

    // Settings

    pub async fn list_communities(&self) -> AppResult<Vec<CommunityRef>> {
        let rows = sqlx::query("SELECT id, name, kind FROM communities ORDER BY position")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(CommunityRef {
                    id: row.get("id"),
                    name: row.get("name"),
                    kind: DestinationKind::parse(row.get("kind"))?,
                })
            })
            .collect()
    }

    pub async fn replace_communities(&self, communities: &[CommunityRef]) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM communities").execute(&mut *tx).await?;

        for (position, community) in communities.iter().enumerate() {
            sqlx::query("INSERT INTO communities (position, id, name, kind) VALUES (?, ?, ?, ?)")
                .bind(position as i64)
                .bind(&community.id)
                .bind(&community.name)
                .bind(community.kind.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_profiles(&self) -> AppResult<Vec<Profile>> {
        let rows = sqlx::query(
            "SELECT id, name, destination_kind, destination_id, usernames, scrape_limit FROM profiles ORDER BY position",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let usernames: String = row.get("usernames");
                Ok(Profile {
                    id: row.get("id"),
                    name: row.get("name"),
                    destination_kind: DestinationKind::parse(row.get("destination_kind"))?,
                    destination_id: row.get("destination_id"),
                    instagram_usernames: serde_json::from_str(&usernames)?,
                    scrape_limit: row.get::<i64, _>("scrape_limit").max(0) as u32,
                })
            })
            .collect()
    }

    pub async fn replace_profiles(&self, profiles: &[Profile]) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM profiles").execute(&mut *tx).await?;

        for (position, profile) in profiles.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO profiles
                (id, position, name, destination_kind, destination_id, usernames, scrape_limit)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&profile.id)
            .bind(position as i64)
            .bind(&profile.name)
            .bind(profile.destination_kind.as_str())
            .bind(&profile.destination_id)
            .bind(serde_json::to_string(&profile.instagram_usernames)?)
            .bind(profile.scrape_limit as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Update the usernames and/or scrape limit of one profile in place
    pub async fn update_profile_sources(
        &self,
        profile_id: &str,
        usernames: Option<&[String]>,
        scrape_limit: Option<u32>,
    ) -> AppResult<bool> {
        let mut updated = false;

        if let Some(usernames) = usernames {
            let result = sqlx::query("UPDATE profiles SET usernames = ? WHERE id = ?")
                .bind(serde_json::to_string(usernames)?)
                .bind(profile_id)
                .execute(&self.pool)
                .await?;
            updated |= result.rows_affected() > 0;
        }

        if let Some(limit) = scrape_limit {
            let result = sqlx::query("UPDATE profiles SET scrape_limit = ? WHERE id = ?")
                .bind(limit as i64)
                .bind(profile_id)
                .execute(&self.pool)
                .await?;
            updated |= result.rows_affected() > 0;
        }

        Ok(updated)
    }

    pub async fn active_profile_id(&self) -> AppResult<String> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM app_settings WHERE key = ?")
                .bind(ACTIVE_PROFILE_KEY)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value.unwrap_or_else(|| DEFAULT_PROFILE_ID.to_string()))
    }

    pub async fn set_active_profile_id(&self, profile_id: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO app_settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(ACTIVE_PROFILE_KEY)
        .bind(profile_id)
        .execute(&self.pool)
        .await?;

        log::info!("Active profile set to {}", profile_id);
        Ok(())
    }

    /// The active profile, if the active id still names an existing profile
    pub async fn active_profile(&self) -> AppResult<Option<Profile>> {
        let active_id = self.active_profile_id().await?;
        let profiles = self.list_profiles().await?;
        Ok(profiles.into_iter().find(|p| p.id == active_id))
    }
}

fn parse_status(raw: String) -> AppResult<PostStatus> {
    PostStatus::from_str(&raw)
        .map_err(|_| AppError::Internal(format!("Corrupt status value in store: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DestinationKind;
    use chrono::Duration;

    async fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(&dir.path().join("relay.db")).await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn seeds_default_profile_once() {
        let (dir, db) = open().await;

        let profiles = db.list_profiles().await.unwrap();
        assert_eq!(profiles, vec![Profile::default_profile()]);
        assert_eq!(db.active_profile_id().await.unwrap(), "default");

        db.replace_profiles(&[]).await.unwrap();
        db.set_active_profile_id("other").await.unwrap();
        drop(db);

        // reopening must not clobber the operator's choice
        let db = Database::connect(&dir.path().join("relay.db")).await.unwrap();
        assert_eq!(db.active_profile_id().await.unwrap(), "other");
    }

    #[tokio::test]
    async fn status_writes_are_per_key() {
        let (_dir, db) = open().await;

        db.set_status("a", PostStatus::Approved).await.unwrap();
        db.set_status("b", PostStatus::Rejected).await.unwrap();
        db.set_status("a", PostStatus::Failed).await.unwrap();

        let all = db.all_statuses().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"].status, PostStatus::Failed);
        assert_eq!(all["b"].status, PostStatus::Rejected);
        assert!(db.get_status("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compare_and_set_only_moves_expected_state() {
        let (_dir, db) = open().await;

        db.set_status("a", PostStatus::Approved).await.unwrap();
        assert!(!db
            .compare_and_set_status("a", PostStatus::Pending, PostStatus::Failed)
            .await
            .unwrap());
        assert!(db
            .compare_and_set_status("a", PostStatus::Approved, PostStatus::Failed)
            .await
            .unwrap());
        assert!(!db
            .compare_and_set_status("missing", PostStatus::Approved, PostStatus::Failed)
            .await
            .unwrap());

        let record = db.get_status("a").await.unwrap().unwrap();
        assert_eq!(record.status, PostStatus::Failed);
    }

    #[tokio::test]
    async fn record_share_accumulates_destinations() {
        let (_dir, db) = open().await;

        db.set_status("abc", PostStatus::Approved).await.unwrap();
        db.record_share("abc", "c1").await.unwrap();
        db.record_share("abc", "c2").await.unwrap();
        db.record_share("abc", "c1").await.unwrap();

        let record = db.get_status("abc").await.unwrap().unwrap();
        assert_eq!(record.status, PostStatus::Uploaded);
        assert_eq!(record.shared_to.len(), 2);
        assert!(record.shared_to.contains(&"c1".to_string()));
        assert!(record.shared_to.contains(&"c2".to_string()));
    }

    #[tokio::test]
    async fn session_is_a_single_row() {
        let (_dir, db) = open().await;
        assert!(db.load_session().await.unwrap().is_none());

        let first = Session {
            access_token: "a1".to_string(),
            refresh_token: Some("r1".to_string()),
            user_id: Some("u1".to_string()),
            issued_at: Utc::now() - Duration::minutes(30),
        };
        db.save_session(&first).await.unwrap();

        let second = Session {
            access_token: "a2".to_string(),
            refresh_token: None,
            user_id: Some("u1".to_string()),
            issued_at: Utc::now(),
        };
        db.save_session(&second).await.unwrap();

        let loaded = db.load_session().await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "a2");
        assert_eq!(loaded.refresh_token, None);
    }

    #[tokio::test]
    async fn profile_sources_update_in_place() {
        let (_dir, db) = open().await;

        let usernames = vec!["nasa".to_string(), "esa".to_string()];
        assert!(db
            .update_profile_sources("default", Some(&usernames), Some(3))
            .await
            .unwrap());
        assert!(!db
            .update_profile_sources("ghost", Some(&usernames), None)
            .await
            .unwrap());

        let profile = db.active_profile().await.unwrap().unwrap();
        assert_eq!(profile.instagram_usernames, usernames);
        assert_eq!(profile.scrape_limit, 3);
    }

    #[tokio::test]
    async fn communities_keep_order() {
        let (_dir, db) = open().await;

        let communities = vec![
            CommunityRef {
                id: "z".to_string(),
                name: "Zeta".to_string(),
                kind: DestinationKind::Community,
            },
            CommunityRef {
                id: "a".to_string(),
                name: "Alpha Club".to_string(),
                kind: DestinationKind::Club,
            },
        ];
        db.replace_communities(&communities).await.unwrap();
        assert_eq!(db.list_communities().await.unwrap(), communities);
    }
}
