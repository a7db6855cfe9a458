pub mod bootstrap;
pub mod deployments;
pub mod models;
pub mod pool;
pub mod valkey;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;

/// Shared, injected handles to the two process-wide resources: a pool of
/// persistent-store connections and a client to the shared key/value
/// service. No module-level singletons.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub valkey: fred::clients::Pool,
    pub config: Arc<Config>,
}
