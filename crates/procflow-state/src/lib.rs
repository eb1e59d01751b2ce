//! procflow-state: run persistence for procflow
//!
//! This crate is the persistence layer of the orchestrator. It records the
//! lifecycle and event trail of every pipeline run and stores phase results
//! as they complete, so an interrupted run resumes after its last durable
//! phase instead of starting over.
//!
//! ## Layer 0 - Data/Persistence
//!
//! ## Key Components
//!
//! - `RunLedger`: run status transitions and the ordered event log
//! - `PhaseStore`: per-phase results keyed by run id + phase index
//! - `FsRunStore`: JSON-file backend for both traits
//! - `fakes`: in-memory backends for tests and embedding

mod error;
pub mod fakes;
pub mod fs_store;
mod schema;
pub mod storage_traits;

pub use error::StorageError;
pub use fs_store::FsRunStore;
pub use schema::{Artifact, PhaseRecord, PhaseStatus};
pub use storage_traits::{
    ContentDigest, PhaseStore, RunEvent, RunId, RunLedger, RunMetadata, RunRecord, RunStatus,
    RunSummary, StorageResult,
};
