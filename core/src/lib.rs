//! spendwatch-core: claims-ledger aggregation and fraud-risk scoring.
//!
//! A batch run scans the claim facts once, builds every aggregate grain,
//! extracts the three risk signals and publishes the result as one
//! immutable snapshot. Readers only ever see a complete snapshot.

pub mod aggregate;
pub mod collaborator;
pub mod composite;
pub mod config;
pub mod error;
pub mod fact;
pub mod pipeline;
pub mod reader;
pub mod rng;
pub mod signals;
pub mod snapshot;
pub mod store;
pub mod synthetic;
pub mod types;

pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Capabilities, PipelineContext};
