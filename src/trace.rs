//! Structured logging macros and debug-category flags, adapted from the
//! teacher's `bgp::tracing`/`bgp::debug` pair: every event carries
//! `proto = "bgp"` and `component = "ribout"` fields so RIB-OUT log lines
//! can be filtered out of the rest of the daemon's BGP logging.

use serde::{Deserialize, Serialize};

/// Log an info-level message tagged for this component.
#[macro_export]
macro_rules! ribout_info {
    ($($arg:tt)*) => {
        tracing::info!(proto = "bgp", component = "ribout", $($arg)*)
    };
}

/// Log a warning-level message tagged for this component.
#[macro_export]
macro_rules! ribout_warn {
    ($($arg:tt)*) => {
        tracing::warn!(proto = "bgp", component = "ribout", $($arg)*)
    };
}

/// Log an error-level message tagged for this component.
#[macro_export]
macro_rules! ribout_error {
    ($($arg:tt)*) => {
        tracing::error!(proto = "bgp", component = "ribout", $($arg)*)
    };
}

/// Log a debug-level message tagged for this component.
#[macro_export]
macro_rules! ribout_debug {
    ($($arg:tt)*) => {
        tracing::debug!(proto = "bgp", component = "ribout", $($arg)*)
    };
}

/// Log a debug-level message gated by a `RibOutDebugFlags` category.
/// Usage: `ribout_debug_cat!(flags, category = "queue", "message", args...)`
#[macro_export]
macro_rules! ribout_debug_cat {
    ($flags:expr, category = $cat:expr, $($arg:tt)*) => {
        if $flags.is_enabled($cat) {
            tracing::debug!(proto = "bgp", component = "ribout", category = $cat, $($arg)*)
        }
    };
}

/// Log a trace-level message tagged for this component.
#[macro_export]
macro_rules! ribout_trace {
    ($($arg:tt)*) => {
        tracing::trace!(proto = "bgp", component = "ribout", $($arg)*)
    };
}

/// Selective debug-category flags for RIB-OUT internals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RibOutDebugFlags {
    /// `UpdateQueue` enqueue/dequeue/marker bookkeeping.
    pub queue: bool,
    /// C8 dequeuer packing/send decisions.
    pub dequeue: bool,
    /// C9 export producer decisions (duplicate/churn detection).
    pub export: bool,
    /// C11 join/leave/merge/split.
    pub membership: bool,
    /// Transport blocking/resume transitions.
    pub blocking: bool,
}

impl RibOutDebugFlags {
    pub fn is_enabled(&self, category: &str) -> bool {
        match category {
            "queue" => self.queue,
            "dequeue" => self.dequeue,
            "export" => self.export,
            "membership" => self.membership,
            "blocking" => self.blocking,
            _ => false,
        }
    }

    pub fn enable_all(&mut self) {
        self.queue = true;
        self.dequeue = true;
        self.export = true;
        self.membership = true;
        self.blocking = true;
    }

    pub fn disable_all(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_category_is_disabled() {
        let flags = RibOutDebugFlags::default();
        assert!(!flags.is_enabled("nonexistent"));
    }

    #[test]
    fn enable_all_then_disable_all_round_trips() {
        let mut flags = RibOutDebugFlags::default();
        flags.enable_all();
        assert!(flags.is_enabled("queue"));
        flags.disable_all();
        assert!(!flags.is_enabled("queue"));
    }
}
