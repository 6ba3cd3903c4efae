//! Error taxonomy: every reportable condition is an [`ErrorInfo`] carrying
//! a severity, a category, the component and operation it came from, and
//! whether retrying can help.

use std::fmt;
use std::time::SystemTime;

/// Severity of a reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorLevel {
    /// Normal-operation information.
    Info = 0,
    /// Recoverable problem.
    Warning = 1,
    /// Failure that needs a recovery attempt.
    Error = 2,
    /// Unrecoverable failure.
    Critical = 3,
}

impl ErrorLevel {
    pub const ALL: [ErrorLevel; 4] = [
        ErrorLevel::Info,
        ErrorLevel::Warning,
        ErrorLevel::Error,
        ErrorLevel::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorLevel::Info => "INFO",
            ErrorLevel::Warning => "WARNING",
            ErrorLevel::Error => "ERROR",
            ErrorLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connect / accept / open / bind failures.
    Connection = 0,
    /// Read / write failures on an established stream.
    Communication = 1,
    /// Rejected configuration values.
    Configuration = 2,
    /// Buffer pool failures.
    Memory = 3,
    /// OS-level failures outside the above.
    System = 4,
    Unknown = 5,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 6] = [
        ErrorCategory::Connection,
        ErrorCategory::Communication,
        ErrorCategory::Configuration,
        ErrorCategory::Memory,
        ErrorCategory::System,
        ErrorCategory::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Connection => "CONNECTION",
            ErrorCategory::Communication => "COMMUNICATION",
            ErrorCategory::Configuration => "CONFIGURATION",
            ErrorCategory::Memory => "MEMORY",
            ErrorCategory::System => "SYSTEM",
            ErrorCategory::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reported error, as recorded by the [`ErrorHub`](crate::hub::ErrorHub).
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub level: ErrorLevel,
    pub category: ErrorCategory,
    /// Component that reported it, e.g. `"tcp_client"`, `"serial"`.
    pub component: String,
    /// Operation in flight, e.g. `"connect"`, `"read"`, `"bind"`.
    pub operation: String,
    pub message: String,
    /// OS error code, when the failure came from a syscall.
    pub os_error: Option<i32>,
    pub retryable: bool,
    pub timestamp: SystemTime,
}

impl ErrorInfo {
    pub fn new(
        level: ErrorLevel,
        category: ErrorCategory,
        component: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            category,
            component: component.into(),
            operation: operation.into(),
            message: message.into(),
            os_error: None,
            retryable: false,
            timestamp: SystemTime::now(),
        }
    }

    pub fn with_os_error(mut self, code: Option<i32>) -> Self {
        self.os_error = code;
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] [{}] {}",
            self.level, self.component, self.operation, self.message
        )?;
        if let Some(code) = self.os_error {
            write!(f, " (os error {code})")?;
        }
        if self.retryable {
            write!(f, " [retryable]")?;
        }
        Ok(())
    }
}

/// Aggregate counters kept by the hub.
#[derive(Debug, Clone, Default)]
pub struct ErrorStats {
    pub total_errors: u64,
    /// Indexed by [`ErrorLevel`] discriminant.
    pub by_level: [u64; 4],
    /// Indexed by [`ErrorCategory`] discriminant.
    pub by_category: [u64; 6],
    pub retryable_errors: u64,
    pub first_error: Option<SystemTime>,
    pub last_error: Option<SystemTime>,
}

impl ErrorStats {
    pub(crate) fn record(&mut self, info: &ErrorInfo) {
        self.total_errors += 1;
        self.by_level[info.level as usize] += 1;
        self.by_category[info.category as usize] += 1;
        if info.retryable {
            self.retryable_errors += 1;
        }
        if self.first_error.is_none() {
            self.first_error = Some(info.timestamp);
        }
        self.last_error = Some(info.timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_matches_severity() {
        assert!(ErrorLevel::Info < ErrorLevel::Warning);
        assert!(ErrorLevel::Warning < ErrorLevel::Error);
        assert!(ErrorLevel::Error < ErrorLevel::Critical);
    }

    #[test]
    fn display_includes_os_error_and_retry_flag() {
        let info = ErrorInfo::new(
            ErrorLevel::Error,
            ErrorCategory::Connection,
            "tcp_client",
            "connect",
            "connection refused",
        )
        .with_os_error(Some(111))
        .retryable(true);
        let text = info.to_string();
        assert!(text.contains("[ERROR]"));
        assert!(text.contains("tcp_client"));
        assert!(text.contains("os error 111"));
        assert!(text.contains("[retryable]"));
    }

    #[test]
    fn stats_record_buckets() {
        let mut stats = ErrorStats::default();
        stats.record(
            &ErrorInfo::new(
                ErrorLevel::Warning,
                ErrorCategory::Communication,
                "serial",
                "read",
                "device gone",
            )
            .retryable(true),
        );
        stats.record(&ErrorInfo::new(
            ErrorLevel::Critical,
            ErrorCategory::Memory,
            "pool",
            "acquire",
            "oversize",
        ));
        assert_eq!(stats.total_errors, 2);
        assert_eq!(stats.by_level[ErrorLevel::Warning as usize], 1);
        assert_eq!(stats.by_category[ErrorCategory::Memory as usize], 1);
        assert_eq!(stats.retryable_errors, 1);
        assert!(stats.first_error.is_some());
    }
}
