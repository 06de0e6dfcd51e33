//! Sync of local progress with a remote store

pub mod remote;

mod manager;

pub use manager::{SyncError, SyncManager, SyncReport, SyncStatus};
pub use remote::{
    InsertReport, MemoryRemoteStore, RemoteError, RemoteRecord, RemoteStore, RestRemoteStore,
};
