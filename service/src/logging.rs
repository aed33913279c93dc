use crate::config::{Config, SyncMode};
use log::{LevelFilter, SetLoggerError};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// Modules to filter out from logging when not in Trace mode.
/// The HTTP stack logs every connection attempt, which buries the reconnect
/// and sync logs during an outage.
const FILTERED_MODULES: &[&str] = &[
    "reqwest",
    "reqwest_retry",
    "hyper",
    "hyper_util",
    "h2",
    "rustls",
    "want",
    "mio",
];

pub struct Logger {}

impl Logger {
    /// Initializes the global terminal logger from the provided Config.
    ///
    /// In `poll` mode the fetched data is printed on stdout, so every log line
    /// goes to stderr to keep stdout parseable.
    pub fn init_logger(config: &Config) -> Result<(), SetLoggerError> {
        let level = config.log_level_filter;
        let log_config = Self::build_log_config(Self::should_filter_dependencies(level));

        TermLogger::init(
            level,
            log_config,
            Self::terminal_mode(config.sync_mode),
            ColorChoice::Auto,
        )
    }

    fn terminal_mode(sync_mode: SyncMode) -> TerminalMode {
        match sync_mode {
            SyncMode::Poll => TerminalMode::Stderr,
            SyncMode::Watch | SyncMode::ForceSync => TerminalMode::Mixed,
        }
    }

    /// Trace shows everything, including dependency logs.
    fn should_filter_dependencies(level: LevelFilter) -> bool {
        level != LevelFilter::Trace
    }

    fn build_log_config(apply_filters: bool) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();

        if apply_filters {
            for module in FILTERED_MODULES {
                builder.add_filter_ignore_str(module);
            }
        }

        builder.build()
    }
}
