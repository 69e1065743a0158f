pub mod app;
pub mod auth_interceptor;
pub mod config;
pub mod expense_handlers;
pub mod metrics;
pub mod payment_handlers;
pub mod pg_repo;
pub mod rate_limiter;
pub mod repo;
pub mod user_handlers;

pub use app::{build_router, AppState};
pub use config::ServiceConfig;
