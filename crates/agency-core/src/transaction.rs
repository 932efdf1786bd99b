//! Compensating transactions over sequential store calls
//!
//! The hosted database is reached through independent REST calls, so a
//! multi-step write cannot be atomic. Each step performed through a
//! [`Transaction`] records how to undo it; on failure the recorded
//! compensations run in reverse order.

use crate::error::{AgencyError, Result};
use crate::ports::Store;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
enum Compensation {
    /// Undo an insert
    Delete { table: String, id: String },
    /// Undo an update by writing back the previous values of patched keys
    Restore {
        table: String,
        id: String,
        undo: Value,
    },
    /// Undo a delete
    Reinsert { table: String, row: Value },
}

impl Compensation {
    fn describe(&self) -> String {
        match self {
            Compensation::Delete { table, id } => format!("delete {}/{}", table, id),
            Compensation::Restore { table, id, .. } => format!("restore {}/{}", table, id),
            Compensation::Reinsert { table, row } => format!(
                "reinsert {}/{}",
                table,
                row.get("id").and_then(Value::as_str).unwrap_or("?")
            ),
        }
    }
}

/// Outcome of a rollback. Failures are collected, not fatal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackReport {
    pub compensated: usize,
    pub failures: Vec<String>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Transaction {
    store: Arc<dyn Store>,
    label: String,
    log: Vec<Compensation>,
    finished: bool,
}

impl Transaction {
    pub fn begin(store: Arc<dyn Store>, label: impl Into<String>) -> Self {
        let label = label.into();
        debug!("Transaction '{}' started", label);
        Self {
            store,
            label,
            log: Vec::new(),
            finished: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of recorded compensations
    pub fn steps(&self) -> usize {
        self.log.len()
    }

    pub async fn insert(&mut self, table: &str, row: Value) -> Result<Value> {
        let stored = self.store.insert(table, row).await?;
        let id = stored
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AgencyError::Storage(format!("insert into {} returned no id", table)))?;
        self.log.push(Compensation::Delete {
            table: table.to_string(),
            id: id.to_string(),
        });
        Ok(stored)
    }

    pub async fn insert_as<T>(&mut self, table: &str, record: &T) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let stored = self.insert(table, serde_json::to_value(record)?).await?;
        Ok(serde_json::from_value(stored)?)
    }

    pub async fn update(&mut self, table: &str, id: &str, patch: Value) -> Result<Option<Value>> {
        let Some(previous) = self.store.get(table, id).await? else {
            return Ok(None);
        };
        let undo = undo_patch(&previous, &patch);
        let updated = self.store.update(table, id, patch).await?;
        if updated.is_some() {
            self.log.push(Compensation::Restore {
                table: table.to_string(),
                id: id.to_string(),
                undo,
            });
        }
        Ok(updated)
    }

    pub async fn update_as<T, P>(&mut self, table: &str, id: &str, patch: &P) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        match self.update(table, id, serde_json::to_value(patch)?).await? {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&mut self, table: &str, id: &str) -> Result<bool> {
        let Some(previous) = self.store.get(table, id).await? else {
            return Ok(false);
        };
        let removed = self.store.delete(table, id).await?;
        if removed {
            self.log.push(Compensation::Reinsert {
                table: table.to_string(),
                row: previous,
            });
        }
        Ok(removed)
    }

    /// Keep every step
    pub fn commit(mut self) {
        debug!(
            "Transaction '{}' committed after {} steps",
            self.label,
            self.log.len()
        );
        self.log.clear();
        self.finished = true;
    }

    /// Undo recorded steps, newest first
    pub async fn rollback(mut self) -> RollbackReport {
        self.finished = true;
        let mut report = RollbackReport::default();
        let log = std::mem::take(&mut self.log);
        warn!(
            "Rolling back transaction '{}' ({} steps)",
            self.label,
            log.len()
        );

        for step in log.into_iter().rev() {
            let outcome = match &step {
                Compensation::Delete { table, id } => self.store.delete(table, id).await.map(|_| ()),
                Compensation::Restore { table, id, undo } => self
                    .store
                    .update(table, id, undo.clone())
                    .await
                    .map(|_| ()),
                Compensation::Reinsert { table, row } => {
                    self.store.insert(table, row.clone()).await.map(|_| ())
                }
            };
            match outcome {
                Ok(()) => report.compensated += 1,
                Err(e) => {
                    error!(
                        "Compensation '{}' in transaction '{}' failed: {}",
                        step.describe(),
                        self.label,
                        e
                    );
                    report.failures.push(format!("{}: {}", step.describe(), e));
                }
            }
        }
        report
    }

    /// Commit on success; roll back on failure and return the original
    /// error, or a `Transaction` error when the rollback was incomplete.
    pub async fn finish<T>(self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.commit();
                Ok(value)
            }
            Err(err) => {
                let label = self.label.clone();
                let report = self.rollback().await;
                if report.is_clean() {
                    Err(err)
                } else {
                    Err(AgencyError::Transaction {
                        step: label,
                        message: format!(
                            "{}; rollback incomplete: {}",
                            err,
                            report.failures.join(", ")
                        ),
                    })
                }
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && !self.log.is_empty() {
            warn!(
                "Transaction '{}' dropped with {} uncompensated steps",
                self.label,
                self.log.len()
            );
        }
    }
}

/// Values that undo `patch` when merged back into the row
fn undo_patch(previous: &Value, patch: &Value) -> Value {
    let mut undo = Map::new();
    if let Value::Object(fields) = patch {
        for key in fields.keys() {
            let old = previous.get(key).cloned().unwrap_or(Value::Null);
            undo.insert(key.clone(), old);
        }
    }
    Value::Object(undo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::Query;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Map-backed store that can be told to fail inserts into one table
    #[derive(Default)]
    struct FakeStore {
        rows: Mutex<BTreeMap<(String, String), Value>>,
        fail_inserts_into: Option<String>,
        fail_deletes: bool,
    }

    impl FakeStore {
        fn len(&self, table: &str) -> usize {
            self.rows
                .lock()
                .unwrap()
                .keys()
                .filter(|(t, _)| t == table)
                .count()
        }
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn insert(&self, table: &str, mut row: Value) -> Result<Value> {
            if self.fail_inserts_into.as_deref() == Some(table) {
                return Err(AgencyError::Storage("insert refused".to_string()));
            }
            if row.get("id").is_none() {
                row["id"] = json!(uuid::Uuid::new_v4().to_string());
            }
            let id = row["id"].as_str().unwrap().to_string();
            self.rows
                .lock()
                .unwrap()
                .insert((table.to_string(), id), row.clone());
            Ok(row)
        }

        async fn get(&self, table: &str, id: &str) -> Result<Option<Value>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(&(table.to_string(), id.to_string()))
                .cloned())
        }

        async fn select(&self, table: &str, _query: &Query) -> Result<Vec<Value>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|((t, _), _)| t == table)
                .map(|(_, v)| v.clone())
                .collect())
        }

        async fn count(&self, table: &str, _query: &Query) -> Result<u64> {
            Ok(self.len(table) as u64)
        }

        async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Option<Value>> {
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.get_mut(&(table.to_string(), id.to_string())) else {
                return Ok(None);
            };
            if let (Value::Object(target), Value::Object(fields)) = (row, patch) {
                for (k, v) in fields {
                    target.insert(k, v);
                }
            }
            Ok(rows.get(&(table.to_string(), id.to_string())).cloned())
        }

        async fn delete(&self, table: &str, id: &str) -> Result<bool> {
            if self.fail_deletes {
                return Err(AgencyError::Storage("delete refused".to_string()));
            }
            Ok(self
                .rows
                .lock()
                .unwrap()
                .remove(&(table.to_string(), id.to_string()))
                .is_some())
        }
    }

    #[test]
    fn test_rollback_deletes_inserted_rows() {
        let store = Arc::new(FakeStore {
            fail_inserts_into: Some("leads".to_string()),
            ..Default::default()
        });
        let dyn_store: Arc<dyn Store> = store.clone();

        tokio_test::block_on(async {
            let mut tx = Transaction::begin(dyn_store, "submit");
            let result = async {
                tx.insert("responses", json!({"form_id": "f1"})).await?;
                tx.insert("contacts", json!({"email": "a@b.co"})).await?;
                tx.insert("leads", json!({"score": 10})).await?;
                Ok::<_, AgencyError>(())
            }
            .await;
            assert_eq!(tx.steps(), 2);

            let err = tx.finish(result).await.unwrap_err();
            assert_eq!(err, AgencyError::Storage("insert refused".to_string()));
        });

        assert_eq!(store.len("responses"), 0);
        assert_eq!(store.len("contacts"), 0);
    }

    #[test]
    fn test_rollback_restores_updates_and_deletes() {
        let store = Arc::new(FakeStore::default());
        let dyn_store: Arc<dyn Store> = store.clone();

        tokio_test::block_on(async {
            store
                .insert("forms", json!({"id": "f1", "title": "Old", "status": "draft"}))
                .await
                .unwrap();
            store
                .insert("questions", json!({"id": "q1", "form_id": "f1"}))
                .await
                .unwrap();

            let mut tx = Transaction::begin(dyn_store, "edit");
            tx.update("forms", "f1", json!({"title": "New", "slug": "new-1"}))
                .await
                .unwrap();
            assert!(tx.delete("questions", "q1").await.unwrap());
            let report = tx.rollback().await;
            assert!(report.is_clean());
            assert_eq!(report.compensated, 2);

            let form = store.get("forms", "f1").await.unwrap().unwrap();
            assert_eq!(form["title"], "Old");
            assert_eq!(form["slug"], Value::Null);
            assert!(store.get("questions", "q1").await.unwrap().is_some());
        });
    }

    #[test]
    fn test_incomplete_rollback_reports_transaction_error() {
        let store = Arc::new(FakeStore {
            fail_deletes: true,
            ..Default::default()
        });
        let dyn_store: Arc<dyn Store> = store.clone();

        tokio_test::block_on(async {
            let mut tx = Transaction::begin(dyn_store, "bootstrap");
            tx.insert("agencies", json!({"name": "Acme"})).await.unwrap();
            let err = tx
                .finish::<()>(Err(AgencyError::Validation("boom".to_string())))
                .await
                .unwrap_err();
            assert!(matches!(err, AgencyError::Transaction { step, .. } if step == "bootstrap"));
        });
        assert_eq!(store.len("agencies"), 1);
    }

    #[test]
    fn test_commit_keeps_rows() {
        let store = Arc::new(FakeStore::default());
        let dyn_store: Arc<dyn Store> = store.clone();

        tokio_test::block_on(async {
            let mut tx = Transaction::begin(dyn_store, "ok");
            tx.insert("todos", json!({"title": "call"})).await.unwrap();
            let value = tx.finish(Ok(7)).await.unwrap();
            assert_eq!(value, 7);
        });
        assert_eq!(store.len("todos"), 1);
    }
}
