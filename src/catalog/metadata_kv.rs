use sqlx::SqlitePool;

use super::CatalogError;

/// Small key-value slot for process-level bookkeeping (last full refresh
/// timestamp, schema migration markers) that doesn't warrant its own table.
pub struct MetadataKvRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MetadataKvRepo<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, CatalogError> {
        sqlx::query_scalar("SELECT value FROM metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool)
            .await
            .map_err(CatalogError::from_sqlx_error)
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), CatalogError> {
        sqlx::query(
            "INSERT INTO metadata (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(self.pool)
        .await
        .map_err(CatalogError::from_sqlx_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_helpers::prepare_store;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = prepare_store().await;
        store.metadata_kv().set("last_full_refresh", "2026-07-28T00:00:00Z").await.unwrap();
        let value = store.metadata_kv().get("last_full_refresh").await.unwrap();
        assert_eq!(value.as_deref(), Some("2026-07-28T00:00:00Z"));
    }
}
