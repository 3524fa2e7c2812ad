//! MCP protocol layer: the tool service and `database://` resources.

pub mod resources;
pub mod service;

pub use service::BrokerService;

use crate::db::ConnectionManager;
use crate::nl::NlQueryGenerator;
use crate::query::QueryExecutor;
use crate::schema::SchemaCache;
use std::sync::Arc;

/// Shared core handles behind the protocol surface.
#[derive(Clone)]
pub struct BrokerState {
    pub manager: Arc<ConnectionManager>,
    pub executor: Arc<QueryExecutor>,
    pub cache: Arc<SchemaCache>,
    pub nl: Arc<NlQueryGenerator>,
}

impl BrokerState {
    pub fn new(
        manager: Arc<ConnectionManager>,
        executor: Arc<QueryExecutor>,
        cache: Arc<SchemaCache>,
    ) -> Self {
        Self {
            manager,
            executor,
            cache,
            nl: Arc::new(NlQueryGenerator::new()),
        }
    }
}
