pub mod config;
pub mod error;
pub mod handlers;
pub mod login;
pub mod middleware;
pub mod observability;
pub mod presenter;
pub mod server;
pub mod templates;

pub use config::{AppConfig, LoggingConfig, ServerConfig};
pub use error::AppError;
pub use observability::init_tracing;
pub use presenter::SessionView;
pub use server::{AppState, KeycloakServer, ServerBuilder, build_app};
