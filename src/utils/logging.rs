use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` selects the filter
/// (default `info`), `LOG_FORMAT=json` switches to structured output.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(fmt::layer().json().with_target(false)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing already initialised: {}", e);
    }
}
