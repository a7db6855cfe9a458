pub mod deployments;
pub mod health;
pub mod logs;

use axum::Router;

use crate::store::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(deployments::router())
        .merge(logs::router())
}
