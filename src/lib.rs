//! db-broker-mcp
//!
//! A multi-database introspection and query-execution broker: an MCP
//! server owning a named fleet of read-only MySQL/PostgreSQL pools, with
//! validated SELECT-class execution, schema and data-quality
//! introspection behind a TTL+LRU cache, cross-database fan-out, and a
//! restricted natural-language query surface.

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod nl;
pub mod profile;
pub mod query;
pub mod schema;
pub mod transport;

pub use config::{BrokerConfig, Cli};
pub use error::{DbError, DbResult};
pub use mcp::{BrokerService, BrokerState};
