//! # Logging
//!
//! Structured logging for the playback core on top of `tracing-subscriber`.
//!
//! One call to [`init_logging`] installs:
//! - an `EnvFilter` scoped to the core crates (dependencies stay at `warn`)
//! - a formatter in pretty, compact or JSON form
//! - an optional forwarding layer that mirrors events into a host
//!   [`LoggerSink`] (os_log, Logcat, a desktop log file)
//!
//! Stream URLs carry session tokens in their query strings and server
//! requests carry access tokens in headers. With redaction on, the forwarding
//! layer scrubs both before anything leaves the process.
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use bridge_traits::time::LogLevel;
//!
//! init_logging(
//!     LoggingConfig::default()
//!         .with_format(LogFormat::Compact)
//!         .with_level(LogLevel::Debug),
//! )?;
//! tracing::info!(target: "core_playback", "Playback core ready");
//! ```

use crate::error::{Error, Result};
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_async::runtime;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Crates whose events follow the configured level.
const CORE_TARGETS: &[&str] = &[
    "core_runtime",
    "core_library",
    "core_playback",
    "core_service",
    "provider_media_server",
    "bridge_desktop",
];

/// Chatty dependencies held at `warn` by the default filter.
const QUIET_TARGETS: &[&str] = &["h2", "hyper", "hyper_util", "reqwest", "rustls", "sqlx"];

/// Field names whose values never reach a sink in clear text.
const SENSITIVE_FIELDS: &[&str] = &[
    "token",
    "secret",
    "password",
    "authorization",
    "cookie",
    "x-media-token",
];

const REDACTED: &str = "[REDACTED]";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human readable
    Pretty,
    /// One JSON object per event
    Json,
    /// Single line per event
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Logging configuration
#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level applied to the core crates
    pub level: LogLevel,
    /// Full `EnvFilter` directive string; replaces the default filter
    pub filter: Option<String>,
    /// Scrub tokens and URL query strings from forwarded events
    pub redact_sensitive: bool,
    /// Host sink that receives a copy of every event passing the filter
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Log span enter/exit (pretty) or the span list (JSON)
    pub enable_spans: bool,
    pub display_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            redact_sensitive: true,
            logger_sink: None,
            enable_spans: false,
            display_target: true,
        }
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_redaction(mut self, enabled: bool) -> Self {
        self.redact_sensitive = enabled;
        self
    }

    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_spans(mut self, enabled: bool) -> Self {
        self.enable_spans = enabled;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails on an invalid filter string or when a global subscriber is already set.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    let forwarding = config
        .logger_sink
        .clone()
        .map(|sink| ForwardingLayer::new(sink, config.redact_sensitive));

    tracing_subscriber::registry()
        .with(format_layer(&config))
        .with(filter)
        .with(forwarding)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn default_directives(level: LogLevel) -> String {
    let level = level_directive(level);
    let mut directives = vec![level.to_string()];
    directives.extend(CORE_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    directives.join(",")
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = config
        .filter
        .clone()
        .unwrap_or_else(|| default_directives(config.level));

    EnvFilter::try_new(directives).map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
}

fn format_layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let spans = if config.enable_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };
    let layer = tracing_subscriber::fmt::layer()
        .with_target(config.display_target)
        .with_writer(io::stdout);

    match config.format {
        LogFormat::Pretty => layer.pretty().with_span_events(spans).boxed(),
        LogFormat::Compact => layer.compact().with_span_events(spans).boxed(),
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_current_span(config.enable_spans)
            .with_span_list(config.enable_spans)
            .boxed(),
    }
}

/// Mirrors events into a [`LoggerSink`].
struct ForwardingLayer {
    sink: Arc<dyn LoggerSink>,
    redact: bool,
}

impl ForwardingLayer {
    fn new(sink: Arc<dyn LoggerSink>, redact: bool) -> Self {
        Self { sink, redact }
    }

    fn entry(&self, event: &Event<'_>, span: Option<String>) -> LogEntry {
        let metadata = event.metadata();
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let message = fields
            .message
            .unwrap_or_else(|| metadata.name().to_string());
        let message = if self.redact {
            redact_urls_in(&message)
        } else {
            message
        };

        let mut entry = LogEntry::new(level_of(metadata.level()), metadata.target(), message);
        for (name, value) in fields.values {
            let value = if self.redact {
                redact_field(&name, &value)
            } else {
                value
            };
            entry = entry.with_field(name, value);
        }
        entry.span_id = span;
        entry
    }
}

impl<S> Layer<S> for ForwardingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if level_of(event.metadata().level()) < self.sink.min_level() {
            return;
        }

        let span = ctx.lookup_current().map(|span| span.name().to_string());
        let entry = self.entry(event, span);
        let sink = Arc::clone(&self.sink);

        // Sinks are async; inside a runtime hand the entry off, outside it
        // deliver synchronously.
        match runtime::current_handle() {
            Some(handle) => {
                handle.spawn(async move {
                    if let Err(err) = sink.log(entry).await {
                        eprintln!("LoggerSink error: {}", err);
                    }
                });
            }
            None => match runtime::block_on(async move { sink.log(entry).await }) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => eprintln!("LoggerSink error: {}", err),
                Err(err) => eprintln!("LoggerSink runtime error: {}", err),
            },
        }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    values: HashMap<String, String>,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            name => {
                self.values.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.to_string());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{:?}", value));
    }
}

fn level_of(level: &tracing::Level) -> LogLevel {
    match *level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

/// Scrub a field value for logging.
///
/// Values of credential-like fields are replaced; anything that looks like
/// a URL loses its query string and fragment.
///
/// ```ignore
/// use core_runtime::logging::redact_field;
///
/// assert_eq!(redact_field("token", "abc"), "[REDACTED]");
/// assert_eq!(
///     redact_field("url", "http://10.0.0.2:32400/stream?session=9"),
///     "http://10.0.0.2:32400/stream?[REDACTED]"
/// );
/// ```
pub fn redact_field(name: &str, value: &str) -> String {
    let name = name.to_ascii_lowercase();
    if SENSITIVE_FIELDS.iter().any(|field| name.contains(field)) {
        REDACTED.to_string()
    } else {
        redact_urls_in(value)
    }
}

/// Drop the query string and fragment of a URL, keeping scheme, host and path.
pub fn redact_url(url: &str) -> String {
    match url.find(['?', '#']) {
        Some(pos) => format!("{}?{}", &url[..pos], REDACTED),
        None => url.to_string(),
    }
}

/// Apply [`redact_url`] to every whitespace-separated URL inside `text`.
fn redact_urls_in(text: &str) -> String {
    if !text.contains("://") {
        return text.to_string();
    }

    text.split(' ')
        .map(|word| {
            if word.contains("://") {
                redact_url(word)
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
