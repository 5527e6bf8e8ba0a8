//! A relational code-intelligence index built from a SCIP protobuf dump.
//!
//! Three stages do the heavy lifting: [`reader`] decodes the `.scip` file,
//! [`builder`] loads it into a SQLite store and derives the
//! `symbol_references`/`call_graph` edge tables, and [`query`] answers the
//! five lookups (definition, references, dependencies, dependents, call
//! chains) against that store. [`verify`] independently re-parses the same
//! `.scip` file to check a store's fidelity, and [`facade`] wraps the
//! ID-based query engine with name-based entry points.

pub mod builder;
pub mod config;
pub mod enclosing;
pub mod error;
pub mod facade;
pub mod model;
pub mod query;
pub mod reader;
pub mod schema;
pub mod verify;

pub use builder::{build, BuildStage, BuildStats};
pub use config::{BuilderConfig, QueryConfig};
pub use error::{CoreError, Result};
pub use model::{classify_role, Relationship};
pub use query::{CallChain, DependencyEdge, ImpactedFile, Location};
pub use reader::{read as read_index, ParsedIndex};
pub use verify::{verify, VerificationResult};
