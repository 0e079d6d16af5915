#![forbid(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod synchronizer;
pub mod transport;

pub use progress_core::Clock;
pub use progress_core::model::{ProgressBatch, ProgressRecord};

pub use buffer::MergeBuffer;
pub use config::SyncConfig;
pub use controller::{FlushController, FlushOutcome, SyncStats};
pub use error::{ConfigError, FlushError, TransportError};
pub use lifecycle::{LifecycleCallback, LifecycleSource, ManualLifecycle, TriggerSet};
pub use synchronizer::ProgressSynchronizer;
pub use transport::{
    BeaconPayload, BestEffortTransport, CredentialSource, HttpReliableTransport, QueuedBeacon,
    ReliableTransport, TransportKind, TransportSelector,
};
