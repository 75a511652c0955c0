#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::unnecessary_literal_bound,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

//! Per-workspace streaming aggregation and snapshot cache.
//!
//! Each workspace receives an ordered stream of [`events::WorkspaceEvent`]s.
//! The [`WorkspaceStore`] buffers them until the history replay is complete,
//! folds them into a [`aggregator::StreamingAggregator`], serves
//! reference-stable [`DerivedSessionState`] snapshots, and collapses history
//! into a single summary exactly once per compaction request.

pub mod aggregator;
pub mod cache;
pub mod compaction;
pub mod config;
pub mod error;
pub mod events;
pub mod replay;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod utils;

pub use config::StoreConfig;
pub use error::{ConfigError, StoreError};
pub use events::{WorkspaceEvent, WorkspaceMessage};
pub use store::{AllStates, DerivedSessionState, WorkspaceMeta, WorkspaceStore};
pub use subscription::StateWatch;
