//! Sequencer-ordered reconciliation of object lifecycle events into an
//! attribute record store.
//!
//! The [`Reconciler`] applies conditional read-compare-write cycles keyed on
//! the `S3_Sequencer` attribute; the [`Dispatcher`] turns normalized bucket
//! events into reconciler calls. Both are generic over the adapter traits in
//! [`traits`], so production wires in Postgres/HTTP adapters and tests wire in
//! the in-memory doubles from [`testing`].

pub mod dispatcher;
pub mod reconciler;
pub mod retry;
pub mod sequencer;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use dispatcher::{DispatchStats, Dispatcher};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use retry::RetryPolicy;
pub use sequencer::{compare, KeyMismatch, SequenceKey};
pub use traits::{AttributeStore, DeleteDisplacedObject, DisplacedKeyHandler, NoopDisplacedKey, ObjectStore};
