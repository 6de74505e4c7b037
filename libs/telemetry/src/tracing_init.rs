use std::sync::OnceLock;

use anyhow::Result;
use tracing::Span;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::TelemetryConfig;

static INIT: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber once per process. Later calls are no-ops,
/// as is a call made after another subscriber was installed elsewhere.
pub fn init_telemetry(cfg: TelemetryConfig) -> Result<()> {
    if INIT.get().is_some() {
        return Ok(());
    }

    let fmt_layer = if cfg.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.default_filter))
        .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .ok();

    INIT.set(()).ok();
    Ok(())
}

/// Records session identifiers on a span declared with empty `app_id` and
/// `request_id` fields.
pub fn with_session_fields(span: &Span, app_id: &str, request_id: Option<&str>) {
    span.record("app_id", tracing::field::display(app_id));
    if let Some(request_id) = request_id {
        span.record("request_id", tracing::field::display(request_id));
    }
}
