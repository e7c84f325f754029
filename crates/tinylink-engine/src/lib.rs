//! Allocation, resolution and reconciliation of short links.
//!
//! [`LinkEngine`] serves requests; [`jobs::Reconciler`] runs the periodic
//! cleanup, view-sync and filter rebuild against the same collaborators.

pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;

pub use config::EngineConfig;
pub use engine::{CodeStatus, LinkEngine, NewLink, SyncReport};
pub use error::{EngineError, Result};
pub use jobs::{JobError, JobOutcome, JobRunner, Reconciler};
