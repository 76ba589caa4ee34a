// skill-export/crates/skill-export/src/telemetry.rs

use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset: `default_level` for this crate,
/// pool chatter kept at warn.
fn fallback_filter(default_level: &str) -> String {
    format!("{default_level},r2d2=warn")
}

/// `RUST_LOG` as currently set, including values loaded from `.env`.
pub fn filter_directive(default_level: &str) -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| fallback_filter(default_level))
}

/// Install the global subscriber, writing to stderr. Returns `false` when a
/// subscriber was already installed. Load `.env` before calling this.
pub fn init_tracing(default_level: &str) -> bool {
    let env_filter = filter_directive(default_level);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
