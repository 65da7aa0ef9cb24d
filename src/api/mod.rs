/// API routes and handlers
pub mod admin;
pub mod auth;
pub mod extract;
pub mod health;
pub mod messages;
pub mod middleware;
pub mod profile;
pub mod psychologists;
pub mod seminars;
pub mod sessions;
pub mod students;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(auth::routes())
        .merge(profile::routes())
        .merge(sessions::routes())
        .merge(psychologists::routes())
        .merge(students::routes())
        .merge(messages::routes())
        .merge(seminars::routes())
        .merge(admin::routes())
}
