//! Store traits for persistence

use super::Query;
use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Table-oriented row store. Rows are JSON objects carrying a string `id`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a row, assigning an `id` when missing. Returns the stored row.
    async fn insert(&self, table: &str, row: Value) -> Result<Value>;
    async fn get(&self, table: &str, id: &str) -> Result<Option<Value>>;
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>>;
    async fn count(&self, table: &str, query: &Query) -> Result<u64>;
    /// Shallow-merge `patch` into the row. `None` when the row does not exist.
    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Option<Value>>;
    /// Returns whether a row was removed
    async fn delete(&self, table: &str, id: &str) -> Result<bool>;
}

/// Typed access on top of [`Store`]
#[async_trait]
pub trait StoreExt: Store {
    async fn insert_as<T>(&self, table: &str, record: &T) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let row = serde_json::to_value(record)?;
        let stored = self.insert(table, row).await?;
        Ok(serde_json::from_value(stored)?)
    }

    async fn get_as<T>(&self, table: &str, id: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(table, id).await? {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    async fn select_as<T>(&self, table: &str, query: &Query) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.select(table, query)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(Into::into))
            .collect()
    }

    async fn first_as<T>(&self, table: &str, query: &Query) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        let query = query.clone().limit(1);
        Ok(self.select_as(table, &query).await?.into_iter().next())
    }

    async fn update_as<T, P>(&self, table: &str, id: &str, patch: &P) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
        P: Serialize + Send + Sync,
    {
        let patch = serde_json::to_value(patch)?;
        match self.update(table, id, patch).await? {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
