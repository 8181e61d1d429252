//! # coinjar-core
//!
//! State-and-sync engine for a shared coin jar: a counter that fills toward a
//! capacity, seals an archive each time it is full, and stays consistent
//! across clients that only meet through a polled room endpoint.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Network calls run on plain threads.
//! - **Single owner**: Stores are mutated through `&mut self` on one thread;
//!   remote snapshots are queued and applied by `JarEngine::pump`.
//! - **Graceful degradation**: Storage and network failures are logged, never
//!   surfaced to a mutation caller.
//! - **Last write wins**: Each resource (`state`, `archives`, `settings`) is
//!   versioned and replaced independently.
//! - **FFI-ready**: UniFFI annotations on `CoinJar` and the record types.

uniffi::setup_scaffolding!();

pub mod archive;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ffi;
pub mod formula;
pub mod jar;
pub mod persist;
pub mod record;
pub mod settings;
pub mod storage;
pub mod sync;
pub mod tasks;

pub use archive::{Archive, ArchivePage, ArchiveStore, ARCHIVE_PAGE_SIZE, DEFAULT_THUMBNAIL};
pub use config::AppConfig;
pub use engine::JarEngine;
pub use error::{CoinJarFfiError, FormulaError, JarError, Result, SyncError};
pub use events::{EventBus, EventKind, JarEvent, ListenerId, Totals};
pub use ffi::CoinJar;
pub use formula::Formula;
pub use jar::{AddOutcome, JarStateMachine, ThumbnailSource};
pub use persist::{FileStore, MemoryStore, PersistentStore};
pub use record::{RecordConfig, RecordOutcome, Slider};
pub use settings::{Settings, SettingsPatch, SettingsStore};
pub use storage::StorageConfig;
pub use sync::{
    DispatchMode, HttpTransport, MemoryTransport, PollHandle, RoomStore, SyncGateway, Transport,
};
pub use tasks::{parse_tasks, PendingTask, TaskRegistry};

pub use coinjar_protocol::{Resource, VersionedPayload};
