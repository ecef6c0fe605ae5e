//! Engine-wide constants
//!
//! Single source of truth for configuration defaults and fixed limits.

/// Default values for engine configuration
pub mod defaults {
    /// Worker threads when the host parallelism cannot be determined
    pub const WORKER_THREADS: usize = 4;
    /// Time allowed for in-flight work when the engine shuts down
    pub const SHUTDOWN_TIMEOUT_MS: u64 = 5_000;
    /// Pending event count above which the dispatcher logs a warning
    pub const EVENT_BACKLOG_WARN: usize = 10_000;
}

/// Snapshot format
pub mod snapshot {
    /// Version written by this engine
    pub const FORMAT_VERSION: u32 = 1;
    /// File name used when a directory is given as the save target
    pub const FILE_NAME: &str = "workflow.json";
}

/// Thread naming
pub mod threads {
    /// Prefix for worker pool threads
    pub const WORKER_NAME: &str = "dataflow-worker";
}

/// Fixed diagnostic texts
pub mod messages {
    /// Leading text of the error recorded on leaves blocked by a failure
    pub const BLOCKED_BY_FAILURE: &str = "Blocked by upstream failure in";
    /// Warning left on a leaf whose execution was canceled
    pub const EXECUTION_CANCELED: &str = "Execution canceled";
}
