//! Saree shop retail management core.
//!
//! Catalog, customer, order, and payment management for a saree shop, built
//! around a reconciliation [`Engine`]: every mutation applies to an
//! in-memory mirror immediately, confirms against a [`Store`] (the REST
//! backend or the offline SQLite fallback), and rolls back exactly when the
//! store refuses. Customer authentication is local-first so a terminal
//! keeps selling when the backend is down.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod notifications;
pub mod store;

pub use api::{ApiUser, LoginResponse, RemoteStore, UserUpdate};
pub use auth::{AuthManager, AuthSession};
pub use cache::LocalStore;
pub use config::StoreConfig;
pub use engine::{Engine, StatusChange};
pub use error::{Error, Result};
pub use models::{
    Category, Customer, CustomerDraft, Order, OrderDraft, OrderItem, OrderStatus, Payment,
    PaymentDraft, PaymentMethod, Saree, SareeDraft,
};
pub use store::Store;

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging (console, plus a daily-rolling file when
/// `log_dir` is given). Call once at process start.
pub fn init_logging(log_dir: Option<&Path>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,saree_pos=debug"));

    let console_layer = fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).ok();
            let file_appender = tracing_appender::rolling::daily(dir, "saree-pos");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            registry
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_target(true))
                .init();
            // The guard flushes on drop; the process logs until exit, so
            // leak it rather than thread it through every caller.
            std::mem::forget(guard);
        }
        None => registry.init(),
    }
}
