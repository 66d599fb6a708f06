//! # trail-core
//!
//! Local shell command log for cmdtrail: records the start and end of every
//! command, pairs them up, and forwards completed commands in checkpointed
//! batches.
//!
//! ## Design Principles
//!
//! - **Synchronous**: every invocation is a short-lived hook process; no async runtime.
//! - **Append-only**: shell sessions only ever append; compaction is the sole rewriter.
//! - **At-least-once**: the cursor moves only after a batch is accepted, duplicates are fine.
//! - **Injected config**: sync reads settings through a [`ConfigProvider`], never globals.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trail_core::{
//!     ConfigProvider, EventStore, FileConfigProvider, StorageConfig, SyncEngine, SyncOptions,
//!     TransportSelector,
//! };
//!
//! let storage = StorageConfig::from_home()?;
//! let config = FileConfigProvider::for_storage(&storage);
//! let transport = TransportSelector::from_config(&config.read()?, &storage);
//! let store = EventStore::new(storage);
//! let report = SyncEngine::new(&store, &config, &transport).sync(SyncOptions::default())?;
//! ```

pub mod compact;
pub mod config;
pub mod correlate;
pub mod error;
pub mod event;
pub mod filter;
pub mod patterns;
pub mod recorder;
pub mod storage;
pub mod store;
pub mod sync;
pub mod transport;

pub use compact::{plan_compaction, CompactReport, Compactor};
pub use config::{ConfigProvider, FileConfigProvider, SyncConfig};
pub use correlate::{find_match, Correlation, CorrelationKey, PreIndex};
pub use error::{Result, TrailError};
pub use event::{CommandContext, Event, Phase};
pub use filter::{mask_sensitive, CommandFilter};
pub use recorder::Recorder;
pub use storage::StorageConfig;
pub use store::{EventStore, LogContents, LogKind};
pub use sync::{
    plan_batch, HostInfo, SkipCounts, SyncEngine, SyncOptions, SyncOutcome, SyncReport,
};
pub use transport::{AgentProbe, Channel, Transport, TransportSelector};
