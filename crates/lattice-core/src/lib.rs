//! Lattice Core - Shared types for the data-modeling query engine
//!
//! This crate provides identifiers, view definitions, predicates and the raw
//! node/edge rows exchanged between the query engine and the remote
//! data-modeling service.

pub mod error;
pub mod identifier;
pub mod limits;
pub mod predicate;
pub mod row;
pub mod view;

pub use error::{Error, Result};
pub use identifier::{InstanceId, ViewId, ViewPropertyId};
pub use predicate::{Predicate, SortDirection, SortSpec};
pub use row::{EdgeRow, NodeRow, RawMapping};
pub use view::{Direction, PropertyKind, ViewCatalog, ViewDefinition, ViewProperty};
