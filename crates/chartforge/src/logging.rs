//! Structured logging setup.
//!
//! Logs go to stderr so stdout carries only the counters report.
//! `RUST_LOG` overrides the default filter; `RUST_LOG_FORMAT=json`
//! switches to one JSON object per event.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset. Directive targets match by
/// prefix, so this covers every `chartforge*` crate.
pub const DEFAULT_FILTER: &str = "chartforge=info";

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json_requested(std::env::var("RUST_LOG_FORMAT").ok().as_deref()) {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

fn json_requested(format: Option<&str>) -> bool {
    format.is_some_and(|v| v.eq_ignore_ascii_case("json"))
}
