use std::sync::Once;

use tracing_subscriber::{EnvFilter, prelude::*};

use crate::settings::LogFormat;

static INIT: Once = Once::new();

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing once for the whole process.
///
/// The `log_format` parameter controls whether logs are output as human-readable
/// text (default) or structured JSON. `RUST_LOG` overrides the default `info` filter.
/// Later calls are no-ops, so tests may call this freely.
pub fn init(log_format: LogFormat) -> anyhow::Result<()> {
    let mut init_result: Option<anyhow::Result<()>> = None;
    INIT.call_once(|| {
        let env_filter = build_env_filter();
        let result = match log_format {
            LogFormat::Text => {
                let fmt_layer = tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .compact()
                    .with_filter(env_filter);
                tracing_subscriber::registry()
                    .with(fmt_layer)
                    .try_init()
                    .map_err(anyhow::Error::from)
            }
            LogFormat::Json => {
                let fmt_layer = tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .json()
                    .with_filter(env_filter);
                tracing_subscriber::registry()
                    .with(fmt_layer)
                    .try_init()
                    .map_err(anyhow::Error::from)
            }
        };
        init_result = Some(result);
    });
    init_result.unwrap_or(Ok(()))
}

/// Run an async test body with tracing installed.
pub async fn with_test_tracing<F, Fut, T>(test_name: &str, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    install_test_subscriber(test_name);
    f().await
}

/// Run a sync test body with tracing installed.
/// This is the synchronous equivalent of `with_test_tracing`.
pub fn with_test_tracing_sync<F, T>(test_name: &str, f: F) -> T
where
    F: FnOnce() -> T,
{
    install_test_subscriber(test_name);
    f()
}

fn install_test_subscriber(test_name: &str) {
    // Another harness (or the test binary itself) may already own the global subscriber.
    if let Err(err) = init(LogFormat::Text) {
        eprintln!("tracing init skipped for {test_name}: {err}");
    }
}
