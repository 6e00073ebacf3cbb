//! Structured logging and tracing
//!
//! Installs the global `tracing` subscriber once per process: a daily
//! rotating file layer plus an optional console layer, both plain text or
//! JSON. Components log through [`StructuredLogger`]s that carry their
//! component name and site id.

use crate::config::LoggingConfig;
use crate::error::{LambdaError, Result};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing::{Level, Subscriber, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod structured;

pub use structured::{LogContext, StructuredLogger, get_logger, get_logger_with_context};

/// Flushes the file writer; lives as long as the process
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static INSTALL: Once = Once::new();
static INSTALL_ERROR: OnceCell<String> = OnceCell::new();

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Per-output levels; unset outputs follow `level`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputLevels {
    console: Level,
    file: Level,
}

impl OutputLevels {
    fn from_config(config: &LoggingConfig) -> Result<Self> {
        let base = parse_log_level(&config.level)?;
        let or_base = |specific: &Option<String>| {
            specific
                .as_deref()
                .and_then(|s| parse_log_level(s).ok())
                .unwrap_or(base)
        };
        Ok(Self {
            console: or_base(&config.console_level),
            file: or_base(&config.file_level),
        })
    }

    /// Level the global filter has to let through
    fn most_verbose(self) -> Level {
        // tracing orders levels by verbosity, TRACE being the greatest
        self.console.max(self.file)
    }
}

/// Install the subscriber; later calls return the outcome of the first
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INSTALL.call_once(|| {
        if let Err(e) = install(config) {
            let _ = INSTALL_ERROR.set(e.to_string());
        }
    });
    match INSTALL_ERROR.get() {
        Some(err) => Err(LambdaError::config(err.clone())),
        None => Ok(()),
    }
}

fn install(config: &LoggingConfig) -> Result<()> {
    let levels = OutputLevels::from_config(config)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("lambda_heatpump={},tokio_modbus=warn", levels.most_verbose()).into()
    });

    let file_layer = if file_logging_disabled() {
        None
    } else {
        let (writer, guard) = non_blocking(rolling_appender(config)?);
        let _ = FILE_GUARD.set(guard);
        Some(output_layer(writer, config.json_format, levels.file))
    };
    let to_file = file_layer.is_some();
    // Without a file the console is the only output left
    let console_layer = (config.console_output || !to_file)
        .then(|| output_layer(std::io::stdout, config.json_format, levels.console));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();
    match installed {
        Ok(()) => {}
        // A test harness or embedding host may own the global subscriber
        Err(_) if !to_file => return Ok(()),
        Err(e) => {
            return Err(LambdaError::config(format!(
                "Failed to install subscriber: {}",
                e
            )));
        }
    }

    if to_file {
        info!(
            "Logging at {} to console, {} to {}",
            levels.console, levels.file, config.file
        );
    } else {
        info!("Logging at {} to console only", levels.console);
    }
    Ok(())
}

fn output_layer<S, W>(writer: W, json: bool, level: Level) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false);
    let filter = LevelFilter::from_level(level);
    if json {
        layer.json().with_filter(filter).boxed()
    } else {
        layer.with_filter(filter).boxed()
    }
}

fn file_logging_disabled() -> bool {
    cfg!(test) || std::env::var_os("LAMBDA_DISABLE_FILE_LOG").is_some()
}

/// `file` may name the log file or its directory
fn log_directory(file: &str) -> PathBuf {
    let path = Path::new(file);
    match (path.extension(), path.parent()) {
        (Some(_), Some(parent)) => parent.to_path_buf(),
        _ => path.to_path_buf(),
    }
}

fn rolling_appender(config: &LoggingConfig) -> Result<rolling::RollingFileAppender> {
    let directory = log_directory(&config.file);
    rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix("lambda-heatpump")
        .filename_suffix("log")
        .max_log_files(config.backup_count.max(1) as usize)
        .build(&directory)
        .map_err(|e| {
            LambdaError::io(format!(
                "Cannot open log directory {}: {}",
                directory.display(),
                e
            ))
        })
}

/// Parse a level name; `WARNING` and `CRITICAL` are accepted as aliases
pub(crate) fn parse_log_level(name: &str) -> Result<Level> {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" | "CRITICAL" => Ok(Level::ERROR),
        _ => Err(LambdaError::config(format!("Invalid log level: {}", name))),
    }
}
