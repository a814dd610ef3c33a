use crate::error::{CliError, Result};
use std::fs::File;
use std::path::PathBuf;
use tracing::Subscriber;
use tracing_subscriber::{
    Layer,
    filter::LevelFilter,
    fmt::{self},
    prelude::*,
    registry::LookupSpan,
};

pub fn level_for(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::OFF;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<PathBuf>) -> Result<()> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .compact();

    let subscriber = tracing_subscriber::registry()
        .with(level_for(verbosity, quiet))
        .with(stderr_layer);

    let installed = if let Some(path) = log_file {
        let file = File::create(&path).map_err(CliError::Io)?;
        subscriber.with(file_layer(file)).try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| CliError::Other(anyhow::anyhow!("Failed to install logger: {}", e)))
}

/// Plain-text records with targets, for `--log-file`.
fn file_layer<S>(file: File) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer().with_writer(file).with_ansi(false).with_target(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::Once;
    use tracing::{debug, error, info, trace, warn};

    static INIT: Once = Once::new();

    fn ensure_global_logger_is_set() {
        INIT.call_once(|| {
            setup_logging(3, false, None).expect("Failed to set up global logger for tests");
        });
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for(0, false), LevelFilter::WARN);
        assert_eq!(level_for(1, false), LevelFilter::INFO);
        assert_eq!(level_for(2, false), LevelFilter::DEBUG);
        assert_eq!(level_for(7, false), LevelFilter::TRACE);
        assert_eq!(level_for(2, true), LevelFilter::OFF);
    }

    #[test]
    #[serial]
    fn initialization_and_macros_work() {
        ensure_global_logger_is_set();

        error!("This is an error");
        warn!("This is a warning");
        info!("This is info");
        debug!("This is debug");
        trace!("This is trace");
    }

    #[test]
    #[serial]
    fn log_file_honours_verbosity_filter() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("stepfold.log");
        let subscriber = tracing_subscriber::registry()
            .with(level_for(1, false))
            .with(file_layer(File::create(&log_path).unwrap()));

        tracing::subscriber::with_default(subscriber, || {
            info!(models = 3, "Ranking started.");
            debug!("Bundle decoded.");
        });

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("Ranking started. models=3"));
        assert!(content.contains(module_path!()));
        assert!(!content.contains("Bundle decoded."));
        assert!(!content.contains('\u{1b}'));
    }

    #[test]
    #[serial]
    fn invalid_log_file_path_propagates_error() {
        let invalid_path = PathBuf::from("/");

        if cfg!(unix) && invalid_path.is_dir() {
            let result = setup_logging(0, false, Some(invalid_path));
            assert!(matches!(result, Err(CliError::Io(_))));
        }
    }
}
