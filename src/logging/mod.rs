//! Logging infrastructure - structured tracing throughout the engine
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log level from the environment or config file
//! - Zero-cost when disabled
//! - Span-based call tracking
//! - Console or file output, human-readable or JSON

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type OutputLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

pub use tracing::{debug, error, info, trace, warn};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Keeps the non-blocking file writer alive for the process lifetime
static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Log file path; console output when absent
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // GIR_MARSHAL_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("GIR_MARSHAL_LOG_LEVEL") {
            config.level = parse_level(&level_str);
        }

        // GIR_MARSHAL_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("GIR_MARSHAL_LOG_FILE") {
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("GIR_MARSHAL_LOG_JSON").is_ok();
        config.show_spans = std::env::var("GIR_MARSHAL_LOG_SPANS").is_ok();

        config
    }

    /// Create high-performance config (minimal logging)
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Create debug config (verbose logging)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            log_path: Some("gir_marshal.log".to_string()),
            json_format: false,
            show_spans: true,
        }
    }
}

pub(crate) fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging with default configuration
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
///
/// Only the first call takes effect.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "gir_marshal={}",
                config.level.as_str().to_lowercase()
            ))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let layer: OutputLayer = match &config.log_path {
            Some(path) => {
                let path = Path::new(path);
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let file = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "gir_marshal.log".to_string());
                let (writer, guard) =
                    tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file));
                let _ = FILE_GUARD.set(guard);

                let base = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_span_events(span_events)
                    .with_target(true);
                if config.json_format {
                    base.json().boxed()
                } else {
                    base.boxed()
                }
            }
            None => {
                let base = fmt::layer()
                    .with_writer(io::stdout)
                    .with_span_events(span_events)
                    .with_target(true)
                    .with_thread_ids(cfg!(debug_assertions))
                    .with_line_number(cfg!(debug_assertions));
                if config.json_format {
                    base.json().boxed()
                } else {
                    base.boxed()
                }
            }
        };

        // Another subscriber may already own the global default.
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init();
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Engine-specific logging functions
// ============================================================================

/// Log native function call
pub fn log_ffi_call(fn_name: &str, arg_count: usize) {
    debug!(
        event = "ffi_call",
        function = fn_name,
        args = arg_count,
        "FFI function called"
    );
}

/// Log native function return
pub fn log_ffi_return(fn_name: &str) {
    trace!(
        event = "ffi_return",
        function = fn_name,
        "FFI function returned"
    );
}

/// Log native or marshaling error
pub fn log_ffi_error(fn_name: &str, error: &str) {
    error!(
        event = "ffi_error",
        function = fn_name,
        error = error,
        "FFI function error"
    );
}

/// Log type conversion
pub fn log_type_conversion(from_type: &str, to_type: &str) {
    trace!(
        event = "type_conversion",
        from = from_type,
        to = to_type,
        "Type conversion performed"
    );
}

/// Log first-use materialization of a callable
pub fn log_materialize(namespace: &str, name: &str) {
    debug!(
        event = "materialize",
        namespace = namespace,
        function = name,
        "Callable materialized"
    );
}

/// Log a floating reference being claimed or released
pub fn log_claim(address: usize, claimed: bool) {
    trace!(
        event = if claimed { "claim" } else { "release" },
        address = format_args!("{:#x}", address),
        "Ownership transition"
    );
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &str) -> PerformanceGuard {
        PerformanceGuard {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: String,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            let elapsed = self.start.elapsed();
            debug!(
                operation = %self.operation,
                duration_us = elapsed.as_micros() as u64,
                "operation completed"
            );
        }
    }
}
