use crate::state::AppState;
use axum::Router;

pub mod dto;
mod extractors;
pub mod handlers;
#[cfg(test)]
pub(crate) mod memory;
mod password;
pub mod repo;
pub mod repo_types;
pub mod services;

pub use repo::PgUserStore;
pub use services::UserService;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::user_routes())
}
