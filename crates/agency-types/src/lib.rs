//! Agency Types - Pure record definitions shared by the CRM backend
//!
//! This crate contains only serde data types with no async runtime
//! dependencies. Every record mirrors one table of the hosted database.

pub mod agency;
pub mod api;
pub mod audit;
pub mod form;
pub mod lead;
pub mod settings;
pub mod subscription;
pub mod todo;

pub use agency::*;
pub use api::*;
pub use audit::*;
pub use form::*;
pub use lead::*;
pub use settings::*;
pub use subscription::*;
pub use todo::*;

/// Generate a fresh record id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
