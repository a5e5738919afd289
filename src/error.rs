use serde::{Deserialize, Serialize};

/// Error produced while compiling a query-function source
///
/// Compile errors are permanent for a given source: the same input always
/// fails the same way, so callers may cache the failure by source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileError {
    pub message: String,
    /// 1-based line of the offending token or node
    pub line: usize,
    /// 0-based column of the offending token or node
    pub column: usize,
}

impl CompileError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}:{})", self.message, self.line, self.column)
    }
}

impl std::error::Error for CompileError {}

/// Reason why a query-function execution failed
///
/// This is returned as `Err(RunError)` from `Sandbox::run()`.
/// A successful execution returns the function's result value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunError {
    // === Budget violations (sticky: the tripped monitor re-raises them) ===
    /// Execution exceeded the wall-clock or synchronous-slice time budget
    Timeout,

    /// Estimated allocations exceeded the memory budget
    MemoryLimit {
        /// Configured limit in bytes
        limit: u64,
        /// Estimated total reached when the monitor tripped
        reached: u64,
    },

    // === Userland errors ===
    /// Sandboxed code threw an uncaught exception
    Exception {
        message: String,
        /// Sandboxed stack description (innermost frame first)
        stack: String,
    },
}

impl RunError {
    pub fn exception(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self::Exception {
            message: message.into(),
            stack: stack.into(),
        }
    }

    /// Returns true if this represents a budget violation
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Self::Timeout | Self::MemoryLimit { .. })
    }

    /// Returns true if this is a userland error from sandboxed code
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }

    /// Stable error kind name, inspectable by transport collaborators
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "TimeoutError",
            Self::MemoryLimit { .. } => "MemoryLimitError",
            Self::Exception { .. } => "RuntimeError",
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> String {
        match self {
            Self::Timeout => "Execution exceeded time budget".to_string(),
            Self::MemoryLimit { limit, reached } => format!(
                "Memory limit exceeded, max: {}, reached: {}",
                format_bytes(*limit),
                format_bytes(*reached)
            ),
            Self::Exception { message, .. } => message.clone(),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind(), self.description())
    }
}

impl std::error::Error for RunError {}

/// Render a byte count with a binary unit suffix
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(RunError::Timeout.kind(), "TimeoutError");
        assert_eq!(
            RunError::MemoryLimit {
                limit: 100,
                reached: 106
            }
            .kind(),
            "MemoryLimitError"
        );
        assert_eq!(RunError::exception("boom", "").kind(), "RuntimeError");
    }

    #[test]
    fn limit_predicate() {
        assert!(RunError::Timeout.is_limit_exceeded());
        assert!(!RunError::exception("x", "").is_limit_exceeded());
    }

    #[test]
    fn bytes_formatting() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(100), "100 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(500 * 1024 * 1024), "500.00 MB");
    }
}
