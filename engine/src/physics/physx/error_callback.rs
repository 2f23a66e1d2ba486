//! Native error reporting
//!
//! PhysX reports problems through an error callback rather than return codes.
//! [`TracingErrorCallback`] forwards each report to `tracing` at a level chosen by
//! its [`ErrorCode`]. Nothing reported here aborts the process.

use std::fmt;

use tracing::{debug, error, warn, Level};

/// Severity class of a native report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    DebugWarning,
    InvalidParameter,
    InvalidOperation,
    OutOfMemory,
    InternalError,
    Abort,
    PerfWarning,
}

impl ErrorCode {
    pub fn label(self) -> &'static str {
        match self {
            ErrorCode::DebugWarning => "debug warning",
            ErrorCode::InvalidParameter => "invalid parameter",
            ErrorCode::InvalidOperation => "invalid operation",
            ErrorCode::OutOfMemory => "out of memory",
            ErrorCode::InternalError => "internal error",
            ErrorCode::Abort => "abort",
            ErrorCode::PerfWarning => "performance warning",
        }
    }

    /// Log level the report is written at.
    pub fn level(self) -> Level {
        match self {
            ErrorCode::DebugWarning => Level::DEBUG,
            ErrorCode::PerfWarning => Level::WARN,
            ErrorCode::InvalidParameter
            | ErrorCode::InvalidOperation
            | ErrorCode::OutOfMemory
            | ErrorCode::InternalError
            | ErrorCode::Abort => Level::ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Receiver for native error reports.
pub trait ErrorCallback {
    fn report_error(&self, code: ErrorCode, message: &str, file: &str, line: u32);
}

/// Writes native reports to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorCallback;

impl ErrorCallback for TracingErrorCallback {
    fn report_error(&self, code: ErrorCode, message: &str, file: &str, line: u32) {
        let level = code.level();
        if level == Level::DEBUG {
            debug!(file, line, "PhysX {code}: {message}");
        } else if level == Level::WARN {
            warn!(file, line, "PhysX {code}: {message}");
        } else {
            error!(file, line, "PhysX {code}: {message}");
        }
    }
}
