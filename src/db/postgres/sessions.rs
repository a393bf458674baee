use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

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

pub struct PostgresSessionRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresSessionRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn parse_row(row: &PgRow) -> DbResult<SessionRecord> {
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

    fn parse_rows(rows: Vec<PgRow>) -> DbResult<Vec<SessionRecord>> {
        rows.iter().map(Self::parse_row).collect()
    }
}

#[async_trait]
impl SessionRepo for PostgresSessionRepo {
    async fn upsert(&self, record: &SessionRecord) -> DbResult<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO user_sessions ({SESSION_COLUMNS}, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, NOW(), NOW())
            ON CONFLICT (session_id) DO UPDATE SET
                platform = EXCLUDED.platform,
                device_id = EXCLUDED.device_id,
                device_type = EXCLUDED.device_type,
                device_name = EXCLUDED.device_name,
                app_version = EXCLUDED.app_version,
                user_agent = EXCLUDED.user_agent,
                ip_address = EXCLUDED.ip_address,
                location = EXCLUDED.location,
                access_token_hash = EXCLUDED.access_token_hash,
                refresh_token_hash = EXCLUDED.refresh_token_hash,
                token_expires_at = EXCLUDED.token_expires_at,
                refresh_expires_at = EXCLUDED.refresh_expires_at,
                status = EXCLUDED.status,
                login_method = EXCLUDED.login_method,
                last_active_at = EXCLUDED.last_active_at,
                logout_time = EXCLUDED.logout_time,
                updated_at = NOW()
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
        .execute(&self.write_pool)
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
            SET status = $1, logout_time = COALESCE($2, logout_time), updated_at = NOW()
            WHERE session_id = $3 AND status = 'active'
            "#,
        )
        .bind(status.as_str())
        .bind(logout_time)
        .bind(session_id)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_last_active(&self, session_id: &str, at: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_sessions
            SET last_active_at = $1, updated_at = NOW()
            WHERE session_id = $2 AND status = 'active'
            "#,
        )
        .bind(at)
        .bind(session_id)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_tokens(&self, session_id: &str, tokens: &TokenHashes) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_sessions
            SET access_token_hash = $1, refresh_token_hash = $2,
                token_expires_at = $3, refresh_expires_at = $4, updated_at = NOW()
            WHERE session_id = $5 AND status = 'active'
            "#,
        )
        .bind(&tokens.access_token_hash)
        .bind(&tokens.refresh_token_hash)
        .bind(tokens.access_expires_at)
        .bind(tokens.refresh_expires_at)
        .bind(session_id)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_by_session_id(&self, session_id: &str) -> DbResult<Option<SessionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM user_sessions WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.read_pool)
        .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        status: Option<SessionStatus>,
    ) -> DbResult<Vec<SessionRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM user_sessions
            WHERE user_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY login_time DESC, session_id
            "#
        ))
        .bind(user_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.read_pool)
        .await?;

        Self::parse_rows(rows)
    }

    async fn count_active_by_user(&self, user_id: &str) -> DbResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM user_sessions WHERE user_id = $1 AND status = 'active'",
        )
        .bind(user_id)
        .fetch_one(&self.read_pool)
        .await?;

        Ok(row.get("count"))
    }

    async fn recent_logins(&self, user_id: &str, limit: i64) -> DbResult<Vec<SessionRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM user_sessions
            WHERE user_id = $1
            ORDER BY login_time DESC, session_id
            LIMIT $2
            "#
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.read_pool)
        .await?;

        Self::parse_rows(rows)
    }

    async fn list_by_ip(&self, ip_address: &str, limit: i64) -> DbResult<Vec<SessionRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM user_sessions
            WHERE ip_address = $1
            ORDER BY login_time DESC, session_id
            LIMIT $2
            "#
        ))
        .bind(ip_address)
        .bind(limit)
        .fetch_all(&self.read_pool)
        .await?;

        Self::parse_rows(rows)
    }

    async fn list_by_device(&self, device_id: &str) -> DbResult<Vec<SessionRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM user_sessions
            WHERE device_id = $1
            ORDER BY login_time DESC, session_id
            "#
        ))
        .bind(device_id)
        .fetch_all(&self.read_pool)
        .await?;

        Self::parse_rows(rows)
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE refresh_expires_at < $1")
            .bind(before)
            .execute(&self.write_pool)
            .await?;

        Ok(result.rows_affected())
    }
}
