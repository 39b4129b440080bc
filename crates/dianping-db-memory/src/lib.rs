//! In-memory system of record.
//!
//! Implements [`dianping_storage::ShopStore`] and
//! [`dianping_storage::VoucherStore`] over plain maps. Order transactions
//! hold the store's lock from `begin` until commit or rollback, so they are
//! serializable; writes are undone from an undo log on rollback or drop.
//!
//! Intended for single-instance deployments and tests.

mod storage;

pub use storage::{InMemoryStore, InMemoryTransaction};
