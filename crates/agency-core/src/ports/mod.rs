//! Persistence port
//!
//! The backend never talks to a database engine directly; services go
//! through [`Store`], which both the hosted REST backend and the embedded
//! SQLite backend implement.

pub mod query;
pub mod store;

pub use query::{Filter, FilterOp, Order, Query};
pub use store::{Store, StoreExt};

/// Table names
pub mod tables {
    pub const AGENCIES: &str = "agencies";
    pub const MEMBERS: &str = "agency_members";
    pub const FORMS: &str = "forms";
    pub const QUESTIONS: &str = "form_questions";
    pub const RESPONSES: &str = "form_responses";
    pub const LEADS: &str = "leads";
    pub const CONTACTS: &str = "contacts";
    pub const TODOS: &str = "todos";
    pub const AUDIT_LOGS: &str = "audit_logs";
    pub const PREFERENCES: &str = "user_preferences";

    pub const ALL: &[&str] = &[
        AGENCIES,
        MEMBERS,
        FORMS,
        QUESTIONS,
        RESPONSES,
        LEADS,
        CONTACTS,
        TODOS,
        AUDIT_LOGS,
        PREFERENCES,
    ];
}
