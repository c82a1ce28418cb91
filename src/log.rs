//! Per-instance logging.
//!
//! Each index owns a [`LogContext`]. Messages go to an optional caller
//! supplied sink (the host decides the destination) and are mirrored as
//! `tracing` events under the `tierann` target, so a host that already runs a
//! `tracing` subscriber needs no sink at all.

use std::fmt;
use std::sync::Arc;

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Verbose,
    Notice,
    Warning,
}

impl LogLevel {
    /// Level string handed to the sink.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback receiving `(level, formatted message)`.
pub type LogSink = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logging context owned by one index instance.
#[derive(Clone)]
pub struct LogContext {
    prefix: String,
    sink: Option<LogSink>,
    min_level: LogLevel,
}

impl Default for LogContext {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            sink: None,
            min_level: LogLevel::Verbose,
        }
    }
}

impl fmt::Debug for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogContext")
            .field("prefix", &self.prefix)
            .field("sink", &self.sink.is_some())
            .field("min_level", &self.min_level)
            .finish()
    }
}

impl LogContext {
    /// Context that only emits `tracing` events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context delivering messages to `sink`.
    pub fn with_sink<F>(sink: F) -> Self
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        Self {
            sink: Some(Arc::new(sink)),
            ..Self::default()
        }
    }

    /// Text prepended to every message, e.g. the owning index's name.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Lowest level delivered to the sink. Defaults to [`LogLevel::Verbose`].
    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        let message = if self.prefix.is_empty() {
            args.to_string()
        } else {
            format!("{}{args}", self.prefix)
        };
        match level {
            LogLevel::Debug => tracing::trace!(target: "tierann", "{message}"),
            LogLevel::Verbose => tracing::debug!(target: "tierann", "{message}"),
            LogLevel::Notice => tracing::info!(target: "tierann", "{message}"),
            LogLevel::Warning => tracing::warn!(target: "tierann", "{message}"),
        }
        if level < self.min_level {
            return;
        }
        if let Some(sink) = &self.sink {
            sink(level, &message);
        }
    }

    #[inline]
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }

    #[inline]
    pub fn verbose(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Verbose, args);
    }

    #[inline]
    pub fn notice(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Notice, args);
    }

    #[inline]
    pub fn warning(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Warning, args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn capture(prefix: &'static str) -> (LogContext, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = Arc::clone(&lines);
        let ctx = LogContext::with_sink(move |level, msg| {
            sink_lines.lock().push(format!("{level}: {msg}"));
        })
        .prefix(prefix);
        (ctx, lines)
    }

    #[test]
    fn formats_level_and_message() {
        let (ctx, lines) = capture("test log prefix: ");
        ctx.notice(format_args!("test log message no fmt"));
        ctx.warning(format_args!("test log message {} {}", "with", "args"));

        let lines = lines.lock();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "notice: test log prefix: test log message no fmt");
        assert_eq!(lines[1], "warning: test log prefix: test log message with args");
    }

    #[test]
    fn debug_is_filtered_by_default() {
        let (ctx, lines) = capture("");
        ctx.debug(format_args!("hidden"));
        assert!(lines.lock().is_empty());

        let (ctx, lines) = capture("");
        let ctx = ctx.min_level(LogLevel::Debug);
        ctx.debug(format_args!("shown"));
        assert_eq!(*lines.lock(), vec!["debug: shown".to_string()]);
    }

    #[test]
    fn no_sink_is_silent() {
        LogContext::new().warning(format_args!("goes to tracing only"));
    }
}
