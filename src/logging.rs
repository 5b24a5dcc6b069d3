use tracing_subscriber::{fmt::time::UtcTime, layer::Identity, prelude::*};

use crate::config::LoggingConfig;

/// Initialize logging: console plus an optional non-blocking rolling file
/// appender, configured from [`LoggingConfig`].
///
/// Filter precedence: config level > `RUST_LOG` env var > `info`.
pub fn init_with_config(cfg: &LoggingConfig) {
    let env_filter = if let Some(level) = cfg.level {
        tracing_subscriber::EnvFilter::new(level.as_str())
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stdout),
    );

    if let Some(file_layer) = build_file_layer(cfg) {
        let _ = registry.with(file_layer).try_init();
        return;
    }

    let _ = registry.with(Identity::new()).try_init();
}

fn build_file_layer<S>(cfg: &LoggingConfig) -> Option<Box<dyn tracing_subscriber::Layer<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let log_file = cfg.log_file.as_ref()?;
    let dir = log_file.parent().unwrap_or_else(|| std::path::Path::new("."));
    let filename = log_file.file_name()?;

    let rotation = match cfg.rotation.to_lowercase().as_str() {
        "hourly" => tracing_appender::rolling::Rotation::HOURLY,
        "never" => tracing_appender::rolling::Rotation::NEVER,
        _ => tracing_appender::rolling::Rotation::DAILY,
    };

    if std::fs::create_dir_all(dir).is_err() {
        eprintln!(
            "Failed to create log directory '{}', continuing with stdout logs",
            dir.display()
        );
        return None;
    }

    let file_appender =
        tracing_appender::rolling::RollingFileAppender::new(rotation, dir, filename);
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    // Keep guard alive for process lifetime
    let _leaked: &'static _ = Box::leak(Box::new(file_guard));

    Some(Box::new(
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(non_blocking),
    ))
}
