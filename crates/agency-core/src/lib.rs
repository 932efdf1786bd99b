//! Agency Core
//!
//! Domain logic shared by the CRM backend: the persistence port, the form
//! branching interpreter, lead scoring and compensating transactions.

pub mod error;
pub mod logic;
pub mod ports;
pub mod scoring;
pub mod transaction;

pub use agency_types as types;
pub use error::{AgencyError, Result};
pub use ports::{Filter, FilterOp, Query, Store, StoreExt};
pub use transaction::{RollbackReport, Transaction};
