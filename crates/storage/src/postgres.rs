//! PostgreSQL document store (JSONB).

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool, Postgres, QueryBuilder};
use tracing::{debug, instrument};

use tilestore_common::{DbConfig, StoreError, StoreResult};

use crate::document::DocumentStore;
use crate::filter::Filter;

/// Documents stored as JSONB rows keyed by `(collection, id)`.
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Connect using the `db_config` section.
    pub async fn connect(config: &DbConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_pool_size)
            .connect(&config.connection_url())
            .await
            .map_err(|e| {
                StoreError::catalog(
                    format!("{}:{}/{}", config.host, config.port, config.database),
                    format!("connection failed: {}", e),
                )
            })?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the documents table if needed.
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StoreError::catalog("schema", format!("migration failed: {}", e)))?;
            }
        }

        Ok(())
    }
}

fn field_path(field: &str) -> Vec<String> {
    field.split('.').map(str::to_string).collect()
}

/// Append the SQL predicate for `filter` to `qb`.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    match filter {
        Filter::All => {
            qb.push("TRUE");
        }
        Filter::Eq { field, value } => {
            qb.push("(doc #> ");
            qb.push_bind(field_path(field));
            qb.push(") = ");
            qb.push_bind(Json(value.clone()));
        }
        Filter::In { field, values } => {
            if values.is_empty() {
                qb.push("FALSE");
                return;
            }
            qb.push("(");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push("(doc #> ");
                qb.push_bind(field_path(field));
                qb.push(") = ");
                qb.push_bind(Json(value.clone()));
            }
            qb.push(")");
        }
        Filter::Range { field, min, max } => {
            qb.push("(CASE WHEN jsonb_typeof(doc #> ");
            qb.push_bind(field_path(field));
            qb.push(") = 'number' THEN (doc #>> ");
            qb.push_bind(field_path(field));
            qb.push(")::double precision END");
            match (min, max) {
                (Some(lo), Some(hi)) => {
                    qb.push(" BETWEEN ");
                    qb.push_bind(*lo);
                    qb.push(" AND ");
                    qb.push_bind(*hi);
                }
                (Some(lo), None) => {
                    qb.push(" >= ");
                    qb.push_bind(*lo);
                }
                (None, Some(hi)) => {
                    qb.push(" <= ");
                    qb.push_bind(*hi);
                }
                (None, None) => {
                    qb.push(" IS NOT NULL");
                }
            }
            qb.push(")");
        }
        Filter::And(filters) => {
            qb.push("(");
            for (i, f) in filters.iter().enumerate() {
                if i > 0 {
                    qb.push(" AND ");
                }
                push_filter(qb, f);
            }
            if filters.is_empty() {
                qb.push("TRUE");
            }
            qb.push(")");
        }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    #[instrument(skip(self, doc))]
    async fn upsert(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tilestore_documents (collection, id, doc, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (collection, id)
            DO UPDATE SET
                doc = EXCLUDED.doc,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Json(doc))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::catalog(id, format!("upsert failed: {}", e)))?;

        Ok(())
    }

    #[instrument(skip(self, doc))]
    async fn insert(&self, collection: &str, id: &str, doc: Value) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO tilestore_documents (collection, id, doc, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (collection, id) DO NOTHING
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Json(doc))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::catalog(id, format!("insert failed: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let row = sqlx::query_scalar::<_, Json<Value>>(
            "SELECT doc FROM tilestore_documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::catalog(id, format!("query failed: {}", e)))?;

        Ok(row.map(|Json(doc)| doc))
    }

    #[instrument(skip(self))]
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM tilestore_documents WHERE collection = $1 AND id = $2")
                .bind(collection)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::catalog(id, format!("delete failed: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Value>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT doc FROM tilestore_documents WHERE collection = ",
        );
        qb.push_bind(collection.to_string());
        qb.push(" AND ");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY id ASC");
        if let Some(limit) = limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }
        debug!(sql = qb.sql(), "Running catalog query");

        let rows = qb
            .build_query_scalar::<Json<Value>>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::catalog(collection, format!("query failed: {}", e)))?;

        Ok(rows.into_iter().map(|Json(doc)| doc).collect())
    }
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tilestore_documents (
    collection VARCHAR(200) NOT NULL,
    id TEXT NOT NULL,
    doc JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_tilestore_documents_doc ON tilestore_documents USING GIN (doc);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn render(filter: &Filter) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("");
        push_filter(&mut qb, filter);
        qb.sql().to_string()
    }

    #[test]
    fn test_filter_sql() {
        assert_eq!(render(&Filter::All), "TRUE");
        assert_eq!(render(&Filter::eq("year", 2024)), "(doc #> $1) = $2");
        assert_eq!(
            render(&Filter::is_in("provider", ["a", "b"])),
            "((doc #> $1) = $2 OR (doc #> $3) = $4)"
        );
        assert_eq!(render(&Filter::is_in("provider", Vec::<String>::new())), "FALSE");
        assert!(render(&Filter::range("date", Some(1.0), None)).ends_with(">= $3)"));
        assert_eq!(
            render(&Filter::eq("a", 1).and(Filter::eq("b", 2))),
            "((doc #> $1) = $2 AND (doc #> $3) = $4)"
        );
    }

    #[test]
    fn test_field_path() {
        assert_eq!(field_path("backend.endpoint"), vec!["backend", "endpoint"]);
    }
}
