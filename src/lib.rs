//! sitegraph: incremental build core for static sites
//!
//! Stores typed content nodes, records which queries read which nodes and types,
//! infers a schema from example values, and after every change re-runs only the
//! queries whose inputs changed. Query results are hashed so unchanged output is never
//! rewritten, and expensive field resolution runs in a pool of worker processes.

pub mod actions;
pub mod cli;
pub mod config;
pub mod depgraph;
pub mod error;
pub mod flags;
pub mod hashing;
pub mod logging;
pub mod markdown;
pub mod node;
pub mod pages;
pub mod pipeline;
pub mod plugin;
pub mod query;
pub mod queue;
pub mod schema;
pub mod state;
pub mod store;
pub mod watch;
pub mod worker;
pub mod writer;

pub use error::{BuildError, StoreError};
pub use node::Node;
pub use pipeline::{BuildDriver, BuildReport};
pub use state::SiteState;
