/// Execution budget configuration
///
/// One `SandboxLimits` is supplied per [`Sandbox`](crate::Sandbox) instance
/// and parameterizes the fresh monitor built for every run.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    /// Maximum wall-clock time for one execution in milliseconds
    /// (default: 60s)
    pub timeout_ms: u64,
    /// Maximum uninterrupted synchronous run length in milliseconds
    /// (default: 100ms). Only consecutive synchronous checks count;
    /// async suspension points reset the slice.
    pub sync_slice_ms: u64,
    /// Maximum estimated memory usage in bytes (default: 500MB).
    /// Estimated worst-case footprint, not precise accounting.
    pub memory_limit_bytes: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            sync_slice_ms: 100,
            memory_limit_bytes: 500 * 1024 * 1024,
        }
    }
}

impl SandboxLimits {
    /// Tight limits for untrusted one-shot queries
    pub fn strict() -> Self {
        Self {
            timeout_ms: 1_000,
            sync_slice_ms: 20,
            memory_limit_bytes: 10 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits() {
        let limits = SandboxLimits::default();
        assert_eq!(limits.timeout_ms, 60_000);
        assert_eq!(limits.sync_slice_ms, 100);
        assert_eq!(limits.memory_limit_bytes, 500 * 1024 * 1024);
    }

    #[test]
    fn strict_limits() {
        let limits = SandboxLimits::strict();
        assert!(limits.timeout_ms < SandboxLimits::default().timeout_ms);
        assert!(limits.memory_limit_bytes < SandboxLimits::default().memory_limit_bytes);
    }
}
