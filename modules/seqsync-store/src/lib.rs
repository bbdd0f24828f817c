//! Postgres-backed attribute store.
//!
//! Records are rows of `(item_name, name, value)`. Conditional writes take a
//! per-item advisory lock for the duration of their transaction, check the
//! precondition, then apply. Reads go straight to the primary, so every read
//! is strongly consistent.

pub mod store;

pub use store::PgAttributeStore;
