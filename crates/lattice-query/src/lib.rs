//! Lattice Query - Multi-step graph queries over the data-modeling service
//!
//! A query is a root fetch plus relation hops (direct, reverse, edges).
//! [`QueryStepFactory`] turns hops into [`QueryStep`]s, [`QueryBuilder`]
//! validates the chain and executes it against a [`ServiceClient`], and
//! [`QueryUnpacker`] reassembles the flat per-step tables into nested
//! mappings.
//!
//! [`ServiceClient`]: lattice_client::ServiceClient

#![allow(clippy::result_large_err)]

pub mod builder;
pub mod config;
pub mod construct;
pub mod error;
mod executor;
pub mod factory;
pub mod naming;
pub mod results;
pub mod step;
pub mod unpack;

pub use builder::QueryBuilder;
pub use config::EngineConfig;
pub use construct::{construct, Validation};
pub use error::{QueryError, QueryResult};
pub use factory::{Expansion, QueryStepFactory};
pub use naming::NameGenerator;
pub use results::{QueryResults, StepRows, StepStats, StepTable};
pub use step::{QueryStep, ResultKind, RetrieveLimit, Select, StepExpression};
pub use unpack::{QueryUnpacker, UnpackEdges};
