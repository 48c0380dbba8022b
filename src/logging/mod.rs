//! Operator-facing logging.
//!
//! Library code logs with the ordinary `tracing` macros. The extra operator
//! levels (pass, raw, time, banner, step, exception) are plain `tracing`
//! events carrying a `kind` field, emitted through the helpers in this module.
//! Two layers consume them: [`ConsoleLayer`] (colored stdout) and
//! [`SyslogLayer`] (the platform system log).

mod console;
#[cfg(unix)]
mod syslog;

pub use console::{format_lines, BufferWriter, ConsoleLayer};
#[cfg(unix)]
pub use syslog::SyslogLayer;

use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Longest message emitted as a single line; longer ones are wrapped.
pub const MAX_MESSAGE_LEN: usize = 1024;

static SILENCE: AtomicBool = AtomicBool::new(false);
static SHOW_DEBUG: AtomicBool = AtomicBool::new(false);

/// Log levels understood by the sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Debug,
    Info,
    Pass,
    Warning,
    Error,
    Exception,
    Raw,
    Time,
    Banner,
    Step,
}

impl Level {
    pub fn label(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Pass => "PASS",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Exception => "EXCEPTION",
            Level::Raw => "RAW",
            Level::Time => "TIME",
            Level::Banner => "BANNER",
            Level::Step => "STEP",
        }
    }

    /// Level named by an event's `kind` field.
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "pass" => Some(Level::Pass),
            "raw" => Some(Level::Raw),
            "time" => Some(Level::Time),
            "banner" => Some(Level::Banner),
            "step" => Some(Level::Step),
            "exception" => Some(Level::Exception),
            _ => None,
        }
    }

    /// Level for an event without a `kind` field.
    pub fn from_tracing(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => Level::Error,
            tracing::Level::WARN => Level::Warning,
            tracing::Level::INFO => Level::Info,
            _ => Level::Debug,
        }
    }

    /// Syslog severity (RFC 5424).
    pub fn syslog_severity(&self) -> u8 {
        match self {
            Level::Error | Level::Exception => 3,
            Level::Warning => 4,
            Level::Debug => 7,
            _ => 6,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Suppress console output. Used when stdout carries machine-readable output.
pub fn set_silence(silence: bool) {
    SILENCE.store(silence, Ordering::SeqCst);
}

pub fn is_silenced() -> bool {
    SILENCE.load(Ordering::SeqCst)
}

/// Show debug messages on the console.
pub fn show_debug() {
    SHOW_DEBUG.store(true, Ordering::SeqCst);
}

pub fn hide_debug() {
    SHOW_DEBUG.store(false, Ordering::SeqCst);
}

pub fn debug_enabled() -> bool {
    SHOW_DEBUG.load(Ordering::SeqCst)
}

pub fn pass(message: impl fmt::Display) {
    tracing::info!(kind = "pass", "{}", message);
}

pub fn raw(message: impl fmt::Display) {
    tracing::info!(kind = "raw", "{}", message);
}

pub fn time(message: impl fmt::Display) {
    tracing::info!(kind = "time", "{}", message);
}

pub fn banner(message: impl fmt::Display) {
    tracing::info!(kind = "banner", "{}", message);
}

pub fn step(message: impl fmt::Display) {
    tracing::info!(kind = "step", "{}", message);
}

/// Log an error together with its source chain.
pub fn exception(message: impl fmt::Display, error: &(dyn std::error::Error + 'static)) {
    tracing::error!(kind = "exception", "{}", with_error_chain(message, error));
}

/// `message` followed by one indented line per error in the chain.
pub fn with_error_chain(message: impl fmt::Display, error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = format!("{}\n  {}", message, error);
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(text, "\n  caused by: {}", cause);
        source = cause.source();
    }
    text
}

/// Break a long message into chunks of at most `length` characters.
///
/// Breaks fall on the last space inside the window; the space starts the
/// next chunk. A window without a usable space is cut hard.
pub fn split_message(message: &str, length: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest: Vec<char> = message.chars().collect();
    let length = length.max(2);

    while rest.len() > length {
        let window = &rest[..length];
        let cut = match window.iter().rposition(|c| *c == ' ') {
            Some(index) if index > 0 => index,
            _ => length - 1,
        };
        chunks.push(rest[..cut].iter().collect());
        rest = rest.split_off(cut);
    }
    chunks.push(rest.into_iter().collect());
    chunks
}

/// Logging sinks to install.
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub debug: bool,
    pub color: bool,
    pub syslog: bool,
    pub ident: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            debug: false,
            color: true,
            syslog: true,
            ident: "sfctl".to_string(),
        }
    }
}

/// Install the console and syslog layers as the global subscriber.
///
/// Safe to call more than once; later calls only update the debug flag.
pub fn init(settings: &LogSettings) {
    if settings.debug {
        show_debug();
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,sfctl=debug"));
    let console = ConsoleLayer::stdout(settings.color);

    #[cfg(unix)]
    let syslog = if settings.syslog {
        SyslogLayer::open(&settings.ident).ok()
    } else {
        None
    };
    #[cfg(not(unix))]
    let syslog: Option<tracing_subscriber::layer::Identity> = None;

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(syslog)
        .try_init();
}

/// Collects the `message` and `kind` fields of an event.
#[derive(Default)]
pub(crate) struct EventVisitor {
    pub message: String,
    pub kind: Option<String>,
    pub fields: Vec<(String, String)>,
}

impl EventVisitor {
    /// Resolved level and the message with any extra fields appended.
    pub fn finish(self, metadata_level: &tracing::Level) -> (Level, String) {
        let level = self
            .kind
            .as_deref()
            .and_then(Level::from_kind)
            .unwrap_or_else(|| Level::from_tracing(metadata_level));
        let mut message = self.message;
        for (name, value) in self.fields {
            let _ = write!(message, " {}={}", name, value);
        }
        (level, message)
    }
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "kind" => self.kind = Some(value.to_string()),
            name => self.fields.push((name.to_string(), value.to_string())),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "kind" => self.kind = Some(format!("{:?}", value).trim_matches('"').to_string()),
            name => self.fields.push((name.to_string(), format!("{:?}", value))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_split_short_message() {
        assert_eq!(split_message("hello world", 1024), vec!["hello world".to_string()]);
    }

    #[test]
    fn test_split_on_word_boundary() {
        let chunks = split_message("aaaa bbbb cccc", 10);
        assert_eq!(chunks, vec!["aaaa bbbb".to_string(), " cccc".to_string()]);
    }

    #[test]
    fn test_split_without_spaces() {
        let chunks = split_message(&"x".repeat(25), 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(Level::from_kind("pass"), Some(Level::Pass));
        assert_eq!(Level::from_kind("nope"), None);
        assert_eq!(Level::from_tracing(&tracing::Level::WARN), Level::Warning);
        assert_eq!(Level::from_tracing(&tracing::Level::TRACE), Level::Debug);
        assert_eq!(Level::Exception.syslog_severity(), 3);
    }

    #[test]
    fn test_error_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let outer = crate::error::Error::Other {
            message: "save failed".into(),
            source: Some(Box::new(inner)),
        };
        let text = with_error_chain("Unhandled exception", &outer);
        assert_eq!(text, "Unhandled exception\n  save failed\n  caused by: disk gone");
    }

    proptest! {
        #[test]
        fn split_preserves_content(message in "[a-z ]{0,300}", length in 2usize..64) {
            let chunks = split_message(&message, length);
            prop_assert_eq!(chunks.concat(), message);
            for chunk in &chunks {
                prop_assert!(chunk.chars().count() <= length);
            }
        }
    }
}
