use crate::state::AppState;
use axum::Router;

mod dto;
pub mod extractors;
pub mod handlers;
pub mod linking;
pub mod oauth;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod session;

pub fn router(signup_enabled: bool) -> Router<AppState> {
    Router::new()
        .merge(handlers::public_routes(signup_enabled))
        .merge(handlers::member_routes())
        .merge(handlers::admin_routes())
}
