//! SQLite document store (embedded, no external dependencies)
//!
//! Every table is a collection of JSON rows inside one `records` table.
//! Filters are translated to `json_extract` expressions.

use agency_core::ports::{FilterOp, Query};
use agency_core::{AgencyError, Result, Store};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::query::QueryScalar;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

fn storage_err(e: sqlx::Error) -> AgencyError {
    AgencyError::Storage(e.to_string())
}

#[derive(Debug, Clone, PartialEq)]
enum BindValue {
    Text(String),
    Int(i64),
    Real(f64),
}

impl BindValue {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => BindValue::Text(s.clone()),
            Value::Bool(b) => BindValue::Int(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => BindValue::Int(i),
                None => BindValue::Real(n.as_f64().unwrap_or_default()),
            },
            // json_extract yields JSON text for nested values
            other => BindValue::Text(other.to_string()),
        }
    }
}

fn bind_values<'q, O>(
    mut query: QueryScalar<'q, Sqlite, O, SqliteArguments<'q>>,
    values: &[BindValue],
) -> QueryScalar<'q, Sqlite, O, SqliteArguments<'q>>
where
    O: Send + Unpin,
{
    for value in values {
        query = match value {
            BindValue::Text(s) => query.bind(s.clone()),
            BindValue::Int(i) => query.bind(*i),
            BindValue::Real(f) => query.bind(*f),
        };
    }
    query
}

fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// WHERE clause (without the keyword) plus its bind values
fn where_clause(table: &str, query: &Query) -> Result<(String, Vec<BindValue>)> {
    query.validate()?;

    let mut clauses = vec!["collection = ?".to_string()];
    let mut binds = vec![BindValue::Text(table.to_string())];

    for filter in &query.filters {
        let column = format!("json_extract(data, '$.{}')", filter.column);
        match (filter.op, &filter.value) {
            (FilterOp::Eq, Value::Null) => clauses.push(format!("{} IS NULL", column)),
            (FilterOp::Neq, Value::Null) => clauses.push(format!("{} IS NOT NULL", column)),
            (FilterOp::Ilike, value) => {
                let needle = value.as_str().unwrap_or_default();
                clauses.push(format!("{} LIKE ? ESCAPE '\\'", column));
                binds.push(BindValue::Text(escape_like(needle)));
            }
            (FilterOp::In, Value::Array(items)) => {
                if items.is_empty() {
                    clauses.push("0".to_string());
                    continue;
                }
                let placeholders = vec!["?"; items.len()].join(", ");
                clauses.push(format!("{} IN ({})", column, placeholders));
                binds.extend(items.iter().map(BindValue::from_json));
            }
            (op, value) => {
                let sql_op = match op {
                    FilterOp::Eq => "=",
                    FilterOp::Neq => "!=",
                    FilterOp::Gt => ">",
                    FilterOp::Gte => ">=",
                    FilterOp::Lt => "<",
                    FilterOp::Ilike | FilterOp::In => unreachable!("handled above"),
                };
                clauses.push(format!("{} {} ?", column, sql_op));
                binds.push(BindValue::from_json(value));
            }
        }
    }

    Ok((clauses.join(" AND "), binds))
}

fn parse_row(data: &str) -> Result<Value> {
    Ok(serde_json::from_str(data)?)
}

impl SqliteStore {
    pub async fn new(database_path: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        tracing::info!("Opening SQLite database at: {}", database_path);

        // Create parent directory if needed
        if let Some(parent) = std::path::Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| {
                format!("Failed to connect to SQLite database at: {}", database_path)
            })?;

        tracing::info!("SQLite connection established, running migrations...");

        Self::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;

        tracing::info!("Database initialization complete");

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Private in-memory database, used by tests and local demos
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(storage_err)?;
        // A single connection that never expires keeps the memory database alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(storage_err)?;
        Self::run_migrations(&pool).await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_records_agency
            ON records (collection, json_extract(data, '$.agency_id'))
            "#,
        )
        .execute(pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert(&self, table: &str, mut row: Value) -> Result<Value> {
        let Value::Object(fields) = &mut row else {
            return Err(AgencyError::Validation(format!(
                "rows inserted into {} must be objects",
                table
            )));
        };
        let id = match fields.get("id") {
            None | Some(Value::Null) => {
                let id = uuid::Uuid::new_v4().to_string();
                fields.insert("id".to_string(), Value::String(id.clone()));
                id
            }
            Some(Value::String(id)) => id.clone(),
            Some(_) => {
                return Err(AgencyError::Validation(format!(
                    "row id in {} must be a string",
                    table
                )))
            }
        };

        let result = sqlx::query("INSERT INTO records (collection, id, data) VALUES (?1, ?2, ?3)")
            .bind(table)
            .bind(&id)
            .bind(row.to_string())
            .execute(&*self.pool)
            .await;

        match result {
            Ok(_) => Ok(row),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(AgencyError::Conflict(
                format!("{} row '{}' already exists", table, id),
            )),
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<Value>> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM records WHERE collection = ?1 AND id = ?2")
                .bind(table)
                .bind(id)
                .fetch_optional(&*self.pool)
                .await
                .map_err(storage_err)?;

        data.as_deref().map(parse_row).transpose()
    }

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>> {
        let (clause, binds) = where_clause(table, query)?;
        let mut sql = format!("SELECT data FROM records WHERE {}", clause);

        match &query.order {
            Some(order) => sql.push_str(&format!(
                " ORDER BY json_extract(data, '$.{}') {}, rowid ASC",
                order.column,
                if order.ascending { "ASC" } else { "DESC" }
            )),
            None => sql.push_str(" ORDER BY rowid ASC"),
        }
        match (query.limit, query.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        let rows: Vec<String> = bind_values(sqlx::query_scalar(&sql), &binds)
            .fetch_all(&*self.pool)
            .await
            .map_err(storage_err)?;

        rows.iter().map(|data| parse_row(data)).collect()
    }

    async fn count(&self, table: &str, query: &Query) -> Result<u64> {
        let (clause, binds) = where_clause(table, query)?;
        let sql = format!("SELECT COUNT(*) FROM records WHERE {}", clause);

        let count: i64 = bind_values(sqlx::query_scalar(&sql), &binds)
            .fetch_one(&*self.pool)
            .await
            .map_err(storage_err)?;

        Ok(count.max(0) as u64)
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Option<Value>> {
        let Value::Object(fields) = patch else {
            return Err(AgencyError::Validation("update patch must be an object".to_string()));
        };

        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM records WHERE collection = ?1 AND id = ?2")
                .bind(table)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_err)?;

        let Some(data) = data else {
            return Ok(None);
        };

        let mut row = parse_row(&data)?;
        if let Value::Object(target) = &mut row {
            for (key, value) in fields {
                // The id is the primary key and never changes
                if key != "id" {
                    target.insert(key, value);
                }
            }
        }

        sqlx::query("UPDATE records SET data = ?1 WHERE collection = ?2 AND id = ?3")
            .bind(row.to_string())
            .bind(table)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;

        Ok(Some(row))
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM records WHERE collection = ?1 AND id = ?2")
            .bind(table)
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(storage_err)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> SqliteStore {
        let store = SqliteStore::in_memory().await.unwrap();
        for (name, score, status) in [
            ("Ada", 80, "new"),
            ("Grace", 45, "contacted"),
            ("Linus", 10, "new"),
        ] {
            store
                .insert(
                    "leads",
                    json!({"agency_id": "a1", "name": name, "score": score, "status": status}),
                )
                .await
                .unwrap();
        }
        store
            .insert("leads", json!({"agency_id": "a2", "name": "Other", "score": 99}))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_get() {
        let store = SqliteStore::in_memory().await.unwrap();
        let row = store.insert("forms", json!({"title": "Intake"})).await.unwrap();
        let id = row["id"].as_str().unwrap().to_string();

        let fetched = store.get("forms", &id).await.unwrap().unwrap();
        assert_eq!(fetched["title"], "Intake");
        assert!(store.get("contacts", &id).await.unwrap().is_none());

        let err = store
            .insert("forms", json!({"id": id, "title": "Dup"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgencyError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_select_filters_and_order() {
        let store = seeded().await;

        let query = Query::new().eq("agency_id", "a1").gte("score", 40).order_by("score", false);
        let rows = store.select("leads", &query).await.unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Ada", "Grace"]);

        let query = Query::new().eq("agency_id", "a1").ilike("name", "LIN");
        assert_eq!(store.select("leads", &query).await.unwrap().len(), 1);

        let query = Query::new().is_in("status", ["new", "lost"]);
        assert_eq!(store.count("leads", &query).await.unwrap(), 2);

        let query = Query::new().eq("status", Value::Null);
        assert_eq!(store.count("leads", &query).await.unwrap(), 1);

        let query = Query::new().eq("agency_id", "a1").order_by("score", true).limit(1).offset(1);
        let rows = store.select("leads", &query).await.unwrap();
        assert_eq!(rows[0]["name"], "Grace");
    }

    #[tokio::test]
    async fn test_ilike_escapes_wildcards() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert("contacts", json!({"company": "100% Media"})).await.unwrap();
        store.insert("contacts", json!({"company": "1000 Media"})).await.unwrap();

        let query = Query::new().ilike("company", "100%");
        assert_eq!(store.count("contacts", &query).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_merges_and_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        let row = store
            .insert("todos", json!({"title": "Call", "completed": false}))
            .await
            .unwrap();
        let id = row["id"].as_str().unwrap();

        let updated = store
            .update("todos", id, json!({"completed": true, "id": "hijack"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["title"], "Call");
        assert_eq!(updated["completed"], true);
        assert_eq!(updated["id"], id);

        let query = Query::new().eq("completed", true);
        assert_eq!(store.count("todos", &query).await.unwrap(), 1);

        assert!(store.update("todos", "missing", json!({})).await.unwrap().is_none());
        assert!(store.delete("todos", id).await.unwrap());
        assert!(!store.delete("todos", id).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_bad_column() {
        let store = SqliteStore::in_memory().await.unwrap();
        let query = Query::new().eq("name') --", "x");
        assert!(matches!(
            store.select("leads", &query).await,
            Err(AgencyError::Validation(_))
        ));
    }
}
