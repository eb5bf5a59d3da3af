//! Tracing subscriber setup from the `logging` config section.

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use scribe_core::config::LoggingConfig;

/// Filter directives: `-v` forces debug, otherwise the configured level, plus
/// per-crate overrides.
fn directives(config: &LoggingConfig, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config.level.as_deref().unwrap_or("info")
    };
    std::iter::once(level.to_string())
        .chain(config.filters.iter().cloned())
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. `RUST_LOG` takes precedence over config.
pub fn init(config: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(directives(config, verbose))?,
    };

    let writer = if config.output == "stdout" {
        BoxMakeWriter::new(std::io::stdout)
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true).with_writer(writer))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_writer(writer))
            .try_init()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(level: Option<&str>, filters: &[&str]) -> LoggingConfig {
        LoggingConfig {
            format: "plain".into(),
            level: level.map(str::to_string),
            filters: filters.iter().map(|f| f.to_string()).collect(),
            output: "stderr".into(),
        }
    }

    #[test]
    fn test_directives_default() {
        assert_eq!(directives(&config(None, &[]), false), "info");
    }

    #[test]
    fn test_directives_with_filters() {
        let cfg = config(Some("warn"), &["scribe_gateway=debug", "tower_http=info"]);
        assert_eq!(
            directives(&cfg, false),
            "warn,scribe_gateway=debug,tower_http=info"
        );
    }

    #[test]
    fn test_verbose_overrides_level() {
        assert_eq!(directives(&config(Some("error"), &[]), true), "debug");
    }
}
