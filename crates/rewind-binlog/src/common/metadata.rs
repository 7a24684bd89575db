//! Table metadata resolution
//!
//! Binlog row events carry column values but no column names. Names come
//! from the schema catalog, keyed by `(schema, table)` so several table ids
//! for the same table share one catalog query. Table ids are bound when a
//! table-definition event is kept and stay bound for the rest of the run.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::common::{FlashbackError, Result, SchemaCatalog};

/// Column layout of a table as bound to a per-stream table id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub table_id: u64,
    pub schema: String,
    pub table: String,
    /// Column names in ordinal order
    pub columns: Vec<String>,
}

impl TableMetadata {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(String::as_str)
    }
}

/// Resolves table ids to metadata for the lifetime of one run.
pub struct TableMetadataResolver {
    catalog: Arc<dyn SchemaCatalog>,
    /// table id -> bound metadata
    bindings: HashMap<u64, Arc<TableMetadata>>,
    /// (schema, table) -> column names
    columns: HashMap<(String, String), Arc<Vec<String>>>,
}

impl TableMetadataResolver {
    pub fn new(catalog: Arc<dyn SchemaCatalog>) -> Self {
        Self {
            catalog,
            bindings: HashMap::new(),
            columns: HashMap::new(),
        }
    }

    /// Bind `table_id` to `schema.table`, fetching the column list if needed.
    ///
    /// Fails with `SchemaLookup` when the catalog errors or knows no columns.
    /// Failures are not cached.
    pub async fn define(&mut self, table_id: u64, schema: &str, table: &str) -> Result<()> {
        if let Some(existing) = self.bindings.get(&table_id) {
            if existing.schema == schema && existing.table == table {
                return Ok(());
            }
            debug!(
                "Table id {} rebound from {}.{} to {}.{}",
                table_id, existing.schema, existing.table, schema, table
            );
        }

        let columns = self.columns_for(schema, table).await?;
        self.bindings.insert(
            table_id,
            Arc::new(TableMetadata {
                table_id,
                schema: schema.to_string(),
                table: table.to_string(),
                columns: columns.as_ref().clone(),
            }),
        );
        Ok(())
    }

    async fn columns_for(&mut self, schema: &str, table: &str) -> Result<Arc<Vec<String>>> {
        let key = (schema.to_string(), table.to_string());
        if let Some(columns) = self.columns.get(&key) {
            return Ok(Arc::clone(columns));
        }

        let columns = self
            .catalog
            .columns_of(schema, table)
            .await
            .map_err(|e| FlashbackError::schema_lookup(schema, table, e.to_string()))?;
        if columns.is_empty() {
            return Err(FlashbackError::schema_lookup(
                schema,
                table,
                "catalog returned no columns",
            ));
        }

        debug!("Resolved {} columns for {}.{}", columns.len(), schema, table);
        let columns = Arc::new(columns);
        self.columns.insert(key, Arc::clone(&columns));
        Ok(columns)
    }

    /// Metadata bound to `table_id`, if any.
    ///
    /// An unknown id is not an error here; capture may start after the
    /// table-definition event for an open table.
    pub fn lookup(&self, table_id: u64) -> Option<Arc<TableMetadata>> {
        self.bindings.get(&table_id).cloned()
    }

    /// Number of bound table ids.
    pub fn bound_tables(&self) -> usize {
        self.bindings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{LogFileEntry, StaticCatalog};
    use async_trait::async_trait;
    use std::path::PathBuf;

    fn catalog() -> StaticCatalog {
        StaticCatalog::new("/data")
            .with_table("db", "t", ["id", "name"])
            .with_table("db", "u", ["id"])
    }

    #[tokio::test]
    async fn test_define_and_lookup() {
        let mut resolver = TableMetadataResolver::new(Arc::new(catalog()));
        resolver.define(100, "db", "t").await.unwrap();

        let meta = resolver.lookup(100).unwrap();
        assert_eq!(meta.schema, "db");
        assert_eq!(meta.table, "t");
        assert_eq!(meta.columns, vec!["id", "name"]);
        assert_eq!(meta.column(1), Some("name"));
        assert!(resolver.lookup(101).is_none());
    }

    #[tokio::test]
    async fn test_columns_cached_per_table() {
        let catalog = catalog();
        let mut resolver = TableMetadataResolver::new(Arc::new(catalog.clone()));
        resolver.define(100, "db", "t").await.unwrap();
        resolver.define(100, "db", "t").await.unwrap();
        resolver.define(205, "db", "t").await.unwrap();

        assert_eq!(catalog.lookup_count(), 1);
        assert_eq!(resolver.bound_tables(), 2);
        assert_eq!(resolver.lookup(205).unwrap().column_count(), 2);
    }

    #[tokio::test]
    async fn test_rebind_to_other_table() {
        let mut resolver = TableMetadataResolver::new(Arc::new(catalog()));
        resolver.define(7, "db", "t").await.unwrap();
        resolver.define(7, "db", "u").await.unwrap();
        assert_eq!(resolver.lookup(7).unwrap().table, "u");
    }

    #[tokio::test]
    async fn test_unknown_table_fails() {
        let mut resolver = TableMetadataResolver::new(Arc::new(catalog()));
        let err = resolver.define(1, "db", "missing").await.unwrap_err();
        assert!(matches!(err, FlashbackError::SchemaLookup { .. }));
        assert!(resolver.lookup(1).is_none());
    }

    struct FailingCatalog;

    #[async_trait]
    impl SchemaCatalog for FailingCatalog {
        async fn columns_of(&self, _schema: &str, _table: &str) -> Result<Vec<String>> {
            Err(FlashbackError::catalog("server has gone away"))
        }
        async fn list_log_files(&self) -> Result<Vec<LogFileEntry>> {
            Ok(vec![])
        }
        async fn gtid_enabled(&self) -> Result<bool> {
            Ok(false)
        }
        async fn binlog_directory(&self) -> Result<PathBuf> {
            Ok(PathBuf::new())
        }
    }

    #[tokio::test]
    async fn test_catalog_error_becomes_schema_lookup() {
        let mut resolver = TableMetadataResolver::new(Arc::new(FailingCatalog));
        match resolver.define(1, "db", "t").await {
            Err(FlashbackError::SchemaLookup { reason, .. }) => {
                assert!(reason.contains("server has gone away"))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
