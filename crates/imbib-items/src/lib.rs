//! Item records and live result sets for the imbib item list.
//!
//! A [`LiveStore`] answers [`ItemsQuery`]s with [`LiveResults`] that deliver
//! [`ChangeSet`]s to their subscribers whenever the store commits a write.

pub mod attachment;
pub mod change_set;
pub mod item;
pub mod memory_store;
pub mod query;
pub mod store;

pub use attachment::*;
pub use change_set::*;
pub use item::*;
pub use memory_store::{MemoryLibrary, Transaction};
pub use query::*;
pub use store::*;
