//! Database housekeeping: periodic VACUUM and stats refresh, recovered from
//! the original project's maintenance routine (its UI surface is dropped,
//! the underlying operation is kept per SPEC_FULL.md's ambient-stack rule).

use super::{CatalogError, CatalogStore, DatabaseInfo};

pub struct Housekeeping<'a> {
    store: &'a CatalogStore,
}

impl<'a> Housekeeping<'a> {
    pub(crate) fn new(store: &'a CatalogStore) -> Self {
        Self { store }
    }

    /// Reclaims free pages left behind by deletes/updates. Cheap enough to
    /// run on a slow daily timer; callers should not run it inline with a
    /// user-facing request.
    pub async fn vacuum(&self) -> Result<(), CatalogError> {
        sqlx::query("VACUUM").execute(self.store.pool()).await.map_err(CatalogError::from_sqlx_error)?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<DatabaseInfo, CatalogError> {
        self.store.get_database_info().await
    }
}
