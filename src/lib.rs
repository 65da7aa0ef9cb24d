/// CarePath - university mental-health coordination portal
///
/// Session scheduling against psychologist availability, hierarchical
/// enrollment, student and psychologist messaging with live push, seminars
/// and admin reporting behind a JSON REST API.

pub mod account;
pub mod admin;
pub mod api;
pub mod auth;
pub mod availability;
pub mod calendar;
pub mod config;
pub mod context;
pub mod db;
pub mod enrollment;
pub mod error;
pub mod jobs;
pub mod mailer;
pub mod messaging;
pub mod metrics;
pub mod profile;
pub mod rate_limit;
pub mod reports;
pub mod scheduling;
pub mod seminars;
pub mod server;

pub use config::ServerConfig;
pub use context::AppContext;
pub use error::{PortalError, PortalResult};
