//! Storage layer
//!
//! Uses the hosted Supabase REST API in production and SQLite (embedded)
//! for local development and tests. Uses DashMap (in-memory) for caching.

pub mod db;
pub mod memory;
pub mod supabase;

pub use db::SqliteStore;
pub use memory::MemoryCache;
pub use supabase::SupabaseStore;

use crate::config::StorageBackend;
use agency_core::Store;
use std::sync::Arc;

/// Open the configured backend
pub async fn connect(backend: &StorageBackend) -> anyhow::Result<Arc<dyn Store>> {
    match backend {
        StorageBackend::Sqlite { database_path } => {
            Ok(Arc::new(SqliteStore::new(database_path).await?))
        }
        StorageBackend::Supabase { url, service_key } => {
            tracing::info!("Using Supabase REST storage at {}", url);
            Ok(Arc::new(SupabaseStore::new(url.clone(), service_key.clone())))
        }
    }
}
