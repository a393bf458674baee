use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{SessionRecord, SessionRepo, TokenHashes},
    },
    session::SessionStatus,
};

const SESSION_COLUMNS: &str = "session_id, user_id, platform, device_id, device_type, \
     device_name, app_version, user_agent, ip_address, location, access_token_hash, \
     refresh_token_hash, token_expires_at, refresh_expires_at, status, login_method, \
     login_time, last_active_at, logout_time";

pub struct SqliteSessionRepo {
    pool: SqlitePool,
}

impl SqliteSessionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &SqliteRow) -> DbResult<SessionRecord> {
        let status: String = row.get("status");
        Ok(SessionRecord {
            session_id: row.get("session_id"),
            user_id: row.get("user_id"),
            platform: row.get("platform"),
            device_id: row.get("device_id"),
            device_type: row.get("device_type"),
            device_name: row.get("device_name"),
            app_version: row.get("app_version"),
            user_agent: row.get("user_agent"),
            ip_address: row.get("ip_address"),
            location: row.get("location"),
            access_token_hash: row.get("access_token_hash"),
            refresh_token_hash: row.get("refresh_token_hash"),
            access_expires_at: row.get("token_expires_at"),
            refresh_expires_at: row.get("refresh_expires_at"),
            status: status.parse().map_err(DbError::Internal)?,
            login_method: row.get("login_method"),
            login_time: row.get("login_time"),
            last_active_at: row.get("last_active_at"),
            logout_time: row.get("logout_time"),
        })
    }

    fn parse_rows(rows: Vec<SqliteRow>) -> DbResult<Vec<SessionRecord>> {
        rows.iter().map(Self::parse_row).collect()
    }
}

#[async_trait]
impl SessionRepo for SqliteSessionRepo {
    async fn upsert(&self, record: &SessionRecord) -> DbResult<()> {
        let now = Utc::now();

        // A row that already reached a terminal status keeps it
        sqlx::query(&format!(
            r#"
            INSERT INTO user_sessions ({SESSION_COLUMNS}, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (session_id) DO UPDATE SET
                platform = excluded.platform,
                device_id = excluded.device_id,
                device_type = excluded.device_type,
                device_name = excluded.device_name,
                app_version = excluded.app_version,
                user_agent = excluded.user_agent,
                ip_address = excluded.ip_address,
                location = excluded.location,
                access_token_hash = excluded.access_token_hash,
                refresh_token_hash = excluded.refresh_token_hash,
                token_expires_at = excluded.token_expires_at,
                refresh_expires_at = excluded.refresh_expires_at,
                status = excluded.status,
                login_method = excluded.login_method,
                last_active_at = excluded.last_active_at,
                logout_time = excluded.logout_time,
                updated_at = excluded.updated_at
            WHERE user_sessions.status = 'active'
            "#
        ))
        .bind(&record.session_id)
        .bind(&record.user_id)
        .bind(&record.platform)
        .bind(&record.device_id)
        .bind(&record.device_type)
        .bind(&record.device_name)
        .bind(&record.app_version)
        .bind(&record.user_agent)
        .bind(&record.ip_address)
        .bind(&record.location)
        .bind(&record.access_token_hash)
        .bind(&record.refresh_token_hash)
        .bind(record.access_expires_at)
        .bind(record.refresh_expires_at)
        .bind(record.status.as_str())
        .bind(&record.login_method)
        .bind(record.login_time)
        .bind(record.last_active_at)
        .bind(record.logout_time)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        logout_time: Option<DateTime<Utc>>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_sessions
            SET status = ?, logout_time = COALESCE(?, logout_time), updated_at = ?
            WHERE session_id = ? AND status = 'active'
            "#,
        )
        .bind(status.as_str())
        .bind(logout_time)
        .bind(Utc::now())
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_last_active(&self, session_id: &str, at: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_sessions
            SET last_active_at = ?, updated_at = ?
            WHERE session_id = ? AND status = 'active'
            "#,
        )
        .bind(at)
        .bind(Utc::now())
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_tokens(&self, session_id: &str, tokens: &TokenHashes) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_sessions
            SET access_token_hash = ?, refresh_token_hash = ?,
                token_expires_at = ?, refresh_expires_at = ?, updated_at = ?
            WHERE session_id = ? AND status = 'active'
            "#,
        )
        .bind(&tokens.access_token_hash)
        .bind(&tokens.refresh_token_hash)
        .bind(tokens.access_expires_at)
        .bind(tokens.refresh_expires_at)
        .bind(Utc::now())
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_by_session_id(&self, session_id: &str) -> DbResult<Option<SessionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM user_sessions WHERE session_id = ?"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        status: Option<SessionStatus>,
    ) -> DbResult<Vec<SessionRecord>> {
        let status = status.map(|s| s.as_str());
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM user_sessions
            WHERE user_id = ? AND (? IS NULL OR status = ?)
            ORDER BY login_time DESC, session_id
            "#
        ))
        .bind(user_id)
        .bind(status)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Self::parse_rows(rows)
    }

    async fn count_active_by_user(&self, user_id: &str) -> DbResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM user_sessions WHERE user_id = ? AND status = 'active'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("count"))
    }

    async fn recent_logins(&self, user_id: &str, limit: i64) -> DbResult<Vec<SessionRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM user_sessions
            WHERE user_id = ?
            ORDER BY login_time DESC, session_id
            LIMIT ?
            "#
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Self::parse_rows(rows)
    }

    async fn list_by_ip(&self, ip_address: &str, limit: i64) -> DbResult<Vec<SessionRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM user_sessions
            WHERE ip_address = ?
            ORDER BY login_time DESC, session_id
            LIMIT ?
            "#
        ))
        .bind(ip_address)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Self::parse_rows(rows)
    }

    async fn list_by_device(&self, device_id: &str) -> DbResult<Vec<SessionRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM user_sessions
            WHERE device_id = ?
            ORDER BY login_time DESC, session_id
            "#
        ))
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        Self::parse_rows(rows)
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE refresh_expires_at < ?")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
