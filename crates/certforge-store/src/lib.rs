//! Embedded relational persistence for generated datasets.
//!
//! All writes funnel through a single connection and land in one transaction
//! per batch, keeping failure granularity at the batch level: either a whole
//! batch commits or none of it does. Activity is never stored as a column;
//! it is recomputed from `expires_at` at query time.

pub mod errors;
pub mod schema;
pub mod store;

pub use errors::StoreError;
pub use store::{StreamingStore, WritePolicy};
