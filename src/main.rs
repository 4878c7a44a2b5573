//! EigenSlur scoring service: binary entrypoint.
//! Boots the Axum HTTP server, wiring settings, the scoring runtime and metrics.

use eigenslur::{bootstrap::Runtime, config::Settings, create_router, metrics::Metrics};
use shuttle_axum::ShuttleAxum;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default, JSON when `EIGENSLUR_LOG_FORMAT=json`.
/// `RUST_LOG` overrides the default `eigenslur=info,warn` filter.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("eigenslur=info,warn"));
    let json = std::env::var("EIGENSLUR_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // The runtime may already have installed a subscriber; keep it then.
    let _ = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let settings = Settings::load()?;
    let runtime = Runtime::from_settings(settings).await?;

    let metrics = match Metrics::init() {
        Ok(m) => Some(m.handle),
        Err(e) => {
            warn!(error = %e, "metrics disabled");
            None
        }
    };

    let router = create_router(runtime.state(metrics));
    Ok(router.into())
}
