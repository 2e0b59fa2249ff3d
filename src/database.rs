//! SQLite backed canonical store for proxies and subscriptions

use crate::error::StoreError;
use crate::models::{ProxyRecord, Subscription};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

/// SQLite extended result code for UNIQUE violations
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";

const CREATE_PROXIES: &str = r#"
CREATE TABLE IF NOT EXISTS proxies (
    id TEXT PRIMARY KEY NOT NULL,
    url TEXT NOT NULL UNIQUE,
    is_active BOOLEAN NOT NULL DEFAULT 0,
    ip_address TEXT NOT NULL DEFAULT '',
    location TEXT NOT NULL DEFAULT 'unknown',
    location_country TEXT NOT NULL DEFAULT '',
    location_country_code TEXT NOT NULL DEFAULT '',
    times_checked INTEGER NOT NULL DEFAULT 0,
    times_check_succeeded INTEGER NOT NULL DEFAULT 0,
    last_checked TEXT,
    last_active TEXT
)
"#;

const CREATE_SUBSCRIPTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS subscriptions (
    id TEXT PRIMARY KEY NOT NULL,
    url TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL DEFAULT 'plain',
    enabled BOOLEAN NOT NULL DEFAULT 1,
    alive BOOLEAN NOT NULL DEFAULT 1,
    error_message TEXT NOT NULL DEFAULT '',
    alive_timestamp TEXT
)
"#;

const PROXY_COLUMNS: &str = "id, url, is_active, ip_address, location, location_country, \
     location_country_code, times_checked, times_check_succeeded, last_checked, last_active";

/// Handle to the canonical store; cheap to clone
#[derive(Debug, Clone)]
pub struct ProxyDatabase {
    pool: SqlitePool,
}

impl ProxyDatabase {
    /// Open (creating if needed) the database at `database_url`.
    ///
    /// `sqlite::memory:` is served by a single connection so every caller
    /// sees the same in-memory database.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 8 })
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.create_tables().await?;
        Ok(db)
    }

    async fn create_tables(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_PROXIES).execute(&self.pool).await?;
        sqlx::query(CREATE_SUBSCRIPTIONS).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn get_all_proxies(&self) -> Result<Vec<ProxyRecord>, StoreError> {
        let sql = format!("SELECT {PROXY_COLUMNS} FROM proxies ORDER BY url");
        let proxies = sqlx::query_as::<_, ProxyRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(proxies)
    }

    pub async fn get_proxies_by_status(&self, is_active: bool) -> Result<Vec<ProxyRecord>, StoreError> {
        let sql = format!("SELECT {PROXY_COLUMNS} FROM proxies WHERE is_active = ? ORDER BY url");
        let proxies = sqlx::query_as::<_, ProxyRecord>(&sql)
            .bind(is_active)
            .fetch_all(&self.pool)
            .await?;
        Ok(proxies)
    }

    pub async fn get_proxy_by_url(&self, url: &str) -> Result<Option<ProxyRecord>, StoreError> {
        let sql = format!("SELECT {PROXY_COLUMNS} FROM proxies WHERE url = ?");
        let proxy = sqlx::query_as::<_, ProxyRecord>(&sql)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(proxy)
    }

    /// Every stored connection string
    pub async fn get_proxy_urls(&self) -> Result<Vec<String>, StoreError> {
        let urls = sqlx::query_scalar::<_, String>("SELECT url FROM proxies")
            .fetch_all(&self.pool)
            .await?;
        Ok(urls)
    }

    /// Insert a new proxy; a taken URL surfaces as `StoreError::Conflict`
    pub async fn insert_proxy(&self, proxy: &ProxyRecord) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO proxies ({PROXY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(&proxy.id)
            .bind(&proxy.url)
            .bind(proxy.is_active)
            .bind(&proxy.ip_address)
            .bind(&proxy.location)
            .bind(&proxy.location_country)
            .bind(&proxy.location_country_code)
            .bind(proxy.times_checked)
            .bind(proxy.times_check_succeeded)
            .bind(proxy.last_checked)
            .bind(proxy.last_active)
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_error(e, &proxy.url))?;
        Ok(())
    }

    /// Write back an existing proxy by id; returns false when the row is gone
    pub async fn update_proxy(&self, proxy: &ProxyRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE proxies
            SET url = ?, is_active = ?, ip_address = ?, location = ?, location_country = ?,
                location_country_code = ?, times_checked = ?, times_check_succeeded = ?,
                last_checked = ?, last_active = ?
            WHERE id = ?
            "#,
        )
        .bind(&proxy.url)
        .bind(proxy.is_active)
        .bind(&proxy.ip_address)
        .bind(&proxy.location)
        .bind(&proxy.location_country)
        .bind(&proxy.location_country_code)
        .bind(proxy.times_checked)
        .bind(proxy.times_check_succeeded)
        .bind(proxy.last_checked)
        .bind(proxy.last_active)
        .bind(&proxy.id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &proxy.url))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_proxy(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM proxies WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_all_subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        let subscriptions = sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions ORDER BY url")
            .fetch_all(&self.pool)
            .await?;
        Ok(subscriptions)
    }

    pub async fn get_subscriptions_by_enabled(&self, enabled: bool) -> Result<Vec<Subscription>, StoreError> {
        let subscriptions =
            sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE enabled = ? ORDER BY url")
                .bind(enabled)
                .fetch_all(&self.pool)
                .await?;
        Ok(subscriptions)
    }

    pub async fn get_subscription_by_url(&self, url: &str) -> Result<Option<Subscription>, StoreError> {
        let subscription = sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(subscription)
    }

    pub async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, url, kind, enabled, alive, error_message, alive_timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.url)
        .bind(subscription.kind.to_string())
        .bind(subscription.enabled)
        .bind(subscription.alive)
        .bind(&subscription.error_message)
        .bind(subscription.alive_timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &subscription.url))?;
        Ok(())
    }

    pub async fn update_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET url = ?, kind = ?, enabled = ?, alive = ?, error_message = ?, alive_timestamp = ?
            WHERE id = ?
            "#,
        )
        .bind(&subscription.url)
        .bind(subscription.kind.to_string())
        .bind(subscription.enabled)
        .bind(subscription.alive)
        .bind(&subscription.error_message)
        .bind(subscription.alive_timestamp)
        .bind(&subscription.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn map_write_error(err: sqlx::Error, url: &str) -> StoreError {
    if is_url_violation(&err) {
        return StoreError::Conflict {
            url: url.to_string(),
        };
    }
    StoreError::Database(err)
}

/// Only a clash on a `url` column is a conflict; an `id` clash stays a
/// database error
fn is_url_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        let message = db_err.message();
        let unique = db_err
            .code()
            .map(|code| code == SQLITE_CONSTRAINT_UNIQUE)
            .unwrap_or(false)
            || message.contains("UNIQUE constraint failed");
        return unique && message.contains(".url");
    }
    false
}
