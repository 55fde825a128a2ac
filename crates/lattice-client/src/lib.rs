//! Lattice Client - The remote data-modeling service as seen by the query engine
//!
//! This crate defines the [`ServiceClient`] seam the engine talks to and an
//! in-memory implementation used for tests and offline runs.

#![allow(clippy::result_large_err)]

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{ServiceError, ServiceResult};
pub use memory::{FailureRule, MemoryService, RecordedCall};
pub use traits::{EdgeRequest, EdgeTypeFilter, NodeRequest, Page, ProjectionSource, ServiceClient};
