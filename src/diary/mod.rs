//! Food diary ledger and daily aggregation.
//!
//! The ledger of [`LedgerEntry`] values is the only source of truth;
//! [`DailyAggregate`] values are derived from it and can always be rebuilt.

pub mod aggregate;
pub mod data;
pub mod store;

// Re-export commonly used items
pub use aggregate::{aggregate, aggregate_all};
pub use data::{
    today, validate_date, DailyAggregate, LedgerEntry, LedgerEntryBuilder, MealCategory, Nutrients,
    Provenance, UserScope,
};
pub use store::LedgerStore;
