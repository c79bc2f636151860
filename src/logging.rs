//! Host-overridable diagnostic sink.
//!
//! The original C implementation exposed a single global function pointer
//! (`trfb_log_cb`) that every part of the library funneled formatted, tag-prefixed
//! messages through. A process-global mutable callback has no good Rust analogue, so
//! this module re-architects it as a [`LogSink`] trait object held by the [`crate::Server`]
//! at construction time, defaulting to a sink that also forwards to the `log` facade so
//! host applications already running `env_logger`/`tracing-log`/etc. see these messages
//! without doing anything extra.

use std::sync::Arc;

/// Severity of a logged message, matching the original's `I:`/`W:`/`E:` message tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Informational message (`I:`).
    Info,
    /// Warning message (`W:`).
    Warn,
    /// Error message (`E:`).
    Error,
}

impl LogLevel {
    /// The original's one-character tag for this level.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            LogLevel::Info => "I",
            LogLevel::Warn => "W",
            LogLevel::Error => "E",
        }
    }
}

/// A sink that receives formatted diagnostic messages from the server and its
/// connections.
///
/// Implementations must be cheap to call from any worker thread; the server holds a
/// single shared instance behind an `Arc`.
pub trait LogSink: Send + Sync {
    /// Receives one already-formatted message at the given severity.
    fn log(&self, level: LogLevel, message: &str);
}

/// Default sink: writes to stderr and forwards to the `log` facade.
///
/// This is the sink every [`crate::Server`] uses unless the host calls
/// [`crate::Server::set_log_sink`].
#[derive(Debug, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn log(&self, level: LogLevel, message: &str) {
        eprintln!("{}: {}", level.tag(), message);
        match level {
            LogLevel::Info => log::info!("{message}"),
            LogLevel::Warn => log::warn!("{message}"),
            LogLevel::Error => log::error!("{message}"),
        }
    }
}

/// Shared handle to a [`LogSink`], as held by a [`crate::Server`].
pub type SharedLogSink = Arc<dyn LogSink>;

/// Returns the default sink handle (stderr + `log` facade forwarding).
#[must_use]
pub fn default_sink() -> SharedLogSink {
    Arc::new(StderrSink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CapturingSink {
        messages: Mutex<Vec<(LogLevel, String)>>,
    }

    impl LogSink for CapturingSink {
        fn log(&self, level: LogLevel, message: &str) {
            self.messages.lock().unwrap().push((level, message.to_string()));
        }
    }

    #[test]
    fn custom_sink_receives_messages() {
        let sink = Arc::new(CapturingSink {
            messages: Mutex::new(Vec::new()),
        });
        sink.log(LogLevel::Info, "hello");
        sink.log(LogLevel::Error, "boom");

        let messages = sink.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], (LogLevel::Info, "hello".to_string()));
        assert_eq!(messages[1], (LogLevel::Error, "boom".to_string()));
    }

    #[test]
    fn level_tags_match_original_scheme() {
        assert_eq!(LogLevel::Info.tag(), "I");
        assert_eq!(LogLevel::Warn.tag(), "W");
        assert_eq!(LogLevel::Error.tag(), "E");
    }
}
