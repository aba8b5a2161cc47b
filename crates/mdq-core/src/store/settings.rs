//! Persisted runtime settings (key/value rows).
//!
//! `max_concurrent` and `sync_destination` are mutable through the API
//! and must survive restarts, so they live here rather than in the
//! static TOML config.

use anyhow::Result;
use sqlx::Row;

use super::db::Store;
use super::types::Settings;

const KEY_MAX_CONCURRENT: &str = "max_concurrent";
const KEY_SYNC_DESTINATION: &str = "sync_destination";

impl Store {
    /// Load settings, falling back to defaults for missing keys
    /// (fresh database or partial writes from older versions).
    pub async fn load_settings(&self) -> Result<Settings> {
        let rows = sqlx::query("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;

        let mut settings = Settings::default();
        for row in rows {
            let key: String = row.get("key");
            let value: String = row.get("value");
            match key.as_str() {
                KEY_MAX_CONCURRENT => {
                    if let Ok(n) = value.parse::<usize>() {
                        settings.max_concurrent = n.max(1);
                    }
                }
                KEY_SYNC_DESTINATION => settings.sync_destination = value,
                _ => {}
            }
        }
        Ok(settings)
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        for (key, value) in [
            (KEY_MAX_CONCURRENT, settings.max_concurrent.to_string()),
            (KEY_SYNC_DESTINATION, settings.sync_destination.clone()),
        ] {
            sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)")
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}
