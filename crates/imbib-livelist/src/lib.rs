//! Live item list for imbib
//!
//! Keeps an ordered list of item cells in sync with a live store query.
//! Store change-sets are applied incrementally on a single update queue,
//! every visible row listens to its own children, and attachment download
//! progress is folded into the affected row only. Consumers read immutable
//! [`ItemsSnapshot`]s from a watch channel or an [`ItemsObserver`].
//!
//! Entry point is [`ItemsEngine::start`].

pub mod accessory;
pub mod cell;
pub mod children;
pub mod config;
pub mod controller;
pub mod download;
pub mod engine;
pub mod error;
pub mod identifiers;
pub mod preferences;
pub mod queue;
pub mod reconcile;
pub mod search;
pub mod snapshot;
pub mod state;

pub use accessory::{AccessoryResolver, ItemAccessory};
pub use cell::{AttachmentBadge, CellAccessory, ItemCellModel};
pub use config::EngineConfig;
pub use download::{
    AttachmentDownloader, AttachmentFileCleanup, AttachmentFileDeleted, DownloadBatchData, DownloadKind,
    DownloadUpdate,
};
pub use engine::{EngineDeps, ItemsEngine};
pub use error::{ItemsError, LiveListError, ReconcileError, Result};
pub use preferences::{MemoryPreferences, Preferences, TomlPreferences};
pub use snapshot::{ItemsObserver, ItemsSnapshot, LoadState, NoopObserver};
