use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Install color-eyre with a project-standard configuration.
///
/// Call this early in the main() before any fallible operations to ensure
/// colored error output. Safe to call multiple times.
///
/// Configuration:
/// - Shows file:line where errors occur
/// - Hides environment variables (less noise)
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Default filter directives when `RUST_LOG` is not set.
fn default_directives(environment: &Environment) -> &'static str {
    match environment {
        Environment::Development => "debug,lapin=info,redis=info",
        Environment::Testing => "warn",
        Environment::Production | Environment::Other(_) => "info,lapin=warn",
    }
}

/// Initialize tracing with environment-aware configuration and error span capture.
///
/// - **Production** and unknown environments: JSON format for log aggregation,
///   module targets hidden.
/// - **Development**: pretty-printed, human-readable.
/// - **Testing**: compact, warnings only unless `RUST_LOG` says otherwise.
///
/// Every variant includes the `ErrorLayer` so span traces are captured when
/// errors are reported through eyre.
///
/// Environment variables:
/// - `APP_ENV`: selects the environment (see [`Environment::from_env`])
/// - `RUST_LOG`: overrides log levels (e.g., "debug", "message_bus=trace")
///
/// Safe to call more than once; later calls are ignored (common in tests).
pub fn init_tracing(environment: &Environment) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(environment)));

    let result = match environment {
        Environment::Production | Environment::Other(_) => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init(),
        Environment::Development => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init(),
        Environment::Testing => tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().compact().with_test_writer())
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init(),
    };

    match result {
        Ok(_) => {
            info!(environment = %environment, "Tracing initialized with ErrorLayer");
        }
        Err(_) => {
            // Already initialized, which is fine (common in tests)
            debug!("Tracing already initialized, skipping re-initialization");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_development() {
        init_tracing(&Environment::Development);
    }

    #[test]
    fn test_init_tracing_production() {
        init_tracing(&Environment::Production);
    }

    #[test]
    fn test_init_tracing_multiple_calls() {
        let env = Environment::Testing;
        init_tracing(&env);
        init_tracing(&env);
    }

    #[test]
    fn test_init_tracing_with_rust_log_env() {
        temp_env::with_var("RUST_LOG", Some("trace"), || {
            init_tracing(&Environment::Development);
        });
    }

    #[test]
    fn test_default_directives() {
        assert_eq!(default_directives(&Environment::Testing), "warn");
        assert!(default_directives(&Environment::Other("staging".into())).starts_with("info"));
    }
}
