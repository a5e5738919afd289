/// Log event from the sandboxed `console`
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
}

/// Log level for sandboxed console output
///
/// Only the levels exposed by the `console` native binding exist here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Log,
}

impl LogLevel {
    /// Parse log level from a console member name
    pub fn from_str(s: &str) -> Self {
        match s {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            _ => LogLevel::Log,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Log => write!(f, "LOG"),
        }
    }
}

/// Type alias for log event sender
///
/// Console output from sandboxed code is delivered over this channel.
/// When no sender is configured the host prints to stderr.
pub type LogSender = std::sync::mpsc::Sender<LogEvent>;

pub(crate) fn emit(tx: &Option<LogSender>, level: LogLevel, message: String) {
    match tx {
        Some(tx) => {
            let _ = tx.send(LogEvent { level, message });
        }
        None => eprintln!("[{}] {}", level, message),
    }
}
