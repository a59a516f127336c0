pub mod auth;
pub mod billing;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod ledger;
pub mod signature;
pub mod state;
pub mod types;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::state::AppState;

/// Full application router: the provider-facing intake route plus the
/// operator-only ledger surface.
pub fn router(state: AppState) -> Router {
    let ledger_routes = Router::new()
        .route(
            "/internal/ledger/events",
            get(handlers::ledger::list_events_handler),
        )
        .route(
            "/internal/ledger/events/:id",
            get(handlers::ledger::get_event_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::operator_auth,
        ));

    Router::new()
        .route(
            "/webhooks/stripe",
            post(handlers::webhook::stripe_webhook_handler),
        )
        .merge(ledger_routes)
        .with_state(state)
}
