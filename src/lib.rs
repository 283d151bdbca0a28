pub mod config;
pub mod controller;
pub mod crd;
pub mod dispatcher;
pub mod image_id;
pub mod informer;
pub mod pod;
pub mod reconciler;
pub mod registry;
pub mod state;
pub mod store;
pub mod tracker;
pub mod webserver;

use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the fmt subscriber, filtered by `RUST_LOG` and falling back to `default_env`.
pub fn init_tracing(default_env: &str) {
    let default_directive = default_env
        .parse::<Directive>()
        .unwrap_or_else(|_| LevelFilter::INFO.into());
    let filter = EnvFilter::builder()
        .with_default_directive(default_directive)
        .from_env_lossy();

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
}
