//! Logging setup shared by the triage binaries.
//!
//! Output goes to stderr; stdout is reserved for command results.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const TRIAGE_TARGETS: [&str; 2] = ["triage_core", "triage"];

/// Filter directives: other crates at warn, triage crates at `level`
fn default_directives(level: &str) -> String {
    TRIAGE_TARGETS
        .iter()
        .fold(String::from("warn"), |acc, target| format!("{},{}={}", acc, target, level))
}

pub fn init() {
    init_with_level("warn")
}

/// Install the subscriber with the triage crates at `default_level`
///
/// RUST_LOG replaces the default directives entirely when set.
pub fn init_with_level(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(default_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new(default_directives("debug")))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_triage_crates() {
        assert_eq!(
            default_directives("debug"),
            "warn,triage_core=debug,triage=debug"
        );
    }
}
