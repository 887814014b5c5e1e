//! Tracing subscriber setup.
//!
//! Level comes from `RUST_LOG` (default `info`). Load `.env` before calling
//! [`init_tracing`] or a `RUST_LOG` set there is ignored.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().compact().with_target(false))
            .try_init()
    };

    result.map_err(|e| anyhow::anyhow!("Failed to set global subscriber: {}", e))
}
