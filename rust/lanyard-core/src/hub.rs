//! Process-wide error sink.
//!
//! Every component reports failures here; subscribers (loggers, test
//! probes, metric exporters) are invoked synchronously from the reporting
//! site. The hub keeps a bounded ring of recent errors plus a smaller ring
//! per component, and aggregate counters.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{Level, event};

use crate::error::{ErrorCategory, ErrorInfo, ErrorLevel, ErrorStats};

/// Global ring capacity.
const MAX_RECENT_ERRORS: usize = 1000;
/// Per-component ring capacity.
const MAX_COMPONENT_ERRORS: usize = 100;

pub type Subscriber = Arc<dyn Fn(&ErrorInfo) + Send + Sync>;

static GLOBAL: Lazy<ErrorHub> = Lazy::new(ErrorHub::new);

/// Central error sink. Use [`ErrorHub::global`] in library code; tests may
/// build private instances with [`ErrorHub::new`].
pub struct ErrorHub {
    enabled: AtomicBool,
    min_level: AtomicU8,
    subscribers: Mutex<Vec<Subscriber>>,
    records: Mutex<Records>,
}

#[derive(Default)]
struct Records {
    stats: ErrorStats,
    recent: VecDeque<ErrorInfo>,
    by_component: HashMap<String, VecDeque<ErrorInfo>>,
}

impl ErrorHub {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            min_level: AtomicU8::new(ErrorLevel::Info as u8),
            subscribers: Mutex::new(Vec::new()),
            records: Mutex::new(Records::default()),
        }
    }

    /// The process-wide hub.
    pub fn global() -> &'static ErrorHub {
        &GLOBAL
    }

    /// Record `info` and fan it out to subscribers.
    ///
    /// Dropped entirely when reporting is disabled or `info.level` is below
    /// the configured minimum. Subscribers run synchronously on the calling
    /// thread; a panicking subscriber is caught and written to stderr so it
    /// cannot take down the reactor.
    pub fn report(&self, info: ErrorInfo) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        if (info.level as u8) < self.min_level.load(Ordering::Relaxed) {
            return;
        }

        self.trace(&info);

        {
            let mut records = self.records.lock();
            records.stats.record(&info);

            if records.recent.len() == MAX_RECENT_ERRORS {
                records.recent.pop_front();
            }
            records.recent.push_back(info.clone());

            let ring = records
                .by_component
                .entry(info.component.clone())
                .or_default();
            if ring.len() == MAX_COMPONENT_ERRORS {
                ring.pop_front();
            }
            ring.push_back(info.clone());
        }

        let subscribers = self.subscribers.lock().clone();
        for subscriber in subscribers {
            if panic::catch_unwind(AssertUnwindSafe(|| subscriber(&info))).is_err() {
                use std::io::Write;
                let _ = writeln!(
                    io::stderr(),
                    "lanyard: error subscriber panicked while handling: {info}"
                );
            }
        }
    }

    pub fn subscribe(&self, subscriber: impl Fn(&ErrorInfo) + Send + Sync + 'static) {
        self.subscribers.lock().push(Arc::new(subscriber));
    }

    pub fn clear_subscribers(&self) {
        self.subscribers.lock().clear();
    }

    pub fn set_min_level(&self, level: ErrorLevel) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn min_level(&self) -> ErrorLevel {
        match self.min_level.load(Ordering::Relaxed) {
            0 => ErrorLevel::Info,
            1 => ErrorLevel::Warning,
            2 => ErrorLevel::Error,
            _ => ErrorLevel::Critical,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ErrorStats {
        self.records.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        let mut records = self.records.lock();
        records.stats = ErrorStats::default();
        records.recent.clear();
        records.by_component.clear();
    }

    /// The most recent `count` errors, oldest first.
    pub fn recent(&self, count: usize) -> Vec<ErrorInfo> {
        let records = self.records.lock();
        let skip = records.recent.len().saturating_sub(count);
        records.recent.iter().skip(skip).cloned().collect()
    }

    pub fn errors_by_component(&self, component: &str) -> Vec<ErrorInfo> {
        self.records
            .lock()
            .by_component
            .get(component)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_errors(&self, component: &str) -> bool {
        self.records
            .lock()
            .by_component
            .get(component)
            .is_some_and(|ring| !ring.is_empty())
    }

    pub fn count(&self, component: &str, level: ErrorLevel) -> usize {
        self.records
            .lock()
            .by_component
            .get(component)
            .map(|ring| ring.iter().filter(|e| e.level == level).count())
            .unwrap_or(0)
    }

    fn trace(&self, info: &ErrorInfo) {
        match info.level {
            ErrorLevel::Info => event!(
                Level::INFO,
                component = %info.component,
                operation = %info.operation,
                "{}",
                info.message
            ),
            ErrorLevel::Warning => event!(
                Level::WARN,
                component = %info.component,
                operation = %info.operation,
                "{}",
                info.message
            ),
            ErrorLevel::Error | ErrorLevel::Critical => event!(
                Level::ERROR,
                component = %info.component,
                operation = %info.operation,
                retryable = info.retryable,
                "{}",
                info.message
            ),
        }
    }
}

impl Default for ErrorHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Report a connect/accept/bind failure.
pub fn report_connection_error(
    component: &str,
    operation: &str,
    err: &io::Error,
    retryable: bool,
) {
    ErrorHub::global().report(
        ErrorInfo::new(
            ErrorLevel::Error,
            ErrorCategory::Connection,
            component,
            operation,
            err.to_string(),
        )
        .with_os_error(err.raw_os_error())
        .retryable(retryable),
    );
}

/// Report a read/write failure on an established stream.
pub fn report_communication_error(
    component: &str,
    operation: &str,
    message: impl Into<String>,
    retryable: bool,
) {
    ErrorHub::global().report(
        ErrorInfo::new(
            ErrorLevel::Error,
            ErrorCategory::Communication,
            component,
            operation,
            message,
        )
        .retryable(retryable),
    );
}

/// Report a rejected configuration value.
pub fn report_configuration_error(component: &str, operation: &str, message: impl Into<String>) {
    ErrorHub::global().report(ErrorInfo::new(
        ErrorLevel::Error,
        ErrorCategory::Configuration,
        component,
        operation,
        message,
    ));
}

/// Report a pool failure; these are always critical.
pub fn report_memory_error(component: &str, operation: &str, message: impl Into<String>) {
    ErrorHub::global().report(ErrorInfo::new(
        ErrorLevel::Critical,
        ErrorCategory::Memory,
        component,
        operation,
        message,
    ));
}

/// Report an OS-level failure outside the connection/communication paths.
pub fn report_system_error(
    component: &str,
    operation: &str,
    message: impl Into<String>,
    os_error: Option<i32>,
) {
    ErrorHub::global().report(
        ErrorInfo::new(
            ErrorLevel::Error,
            ErrorCategory::System,
            component,
            operation,
            message,
        )
        .with_os_error(os_error),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn info(level: ErrorLevel, component: &str) -> ErrorInfo {
        ErrorInfo::new(level, ErrorCategory::Unknown, component, "op", "message")
    }

    #[test]
    fn min_level_filters() {
        let hub = ErrorHub::new();
        hub.set_min_level(ErrorLevel::Error);
        hub.report(info(ErrorLevel::Warning, "a"));
        hub.report(info(ErrorLevel::Error, "a"));
        assert_eq!(hub.stats().total_errors, 1);
    }

    #[test]
    fn disabled_hub_records_nothing() {
        let hub = ErrorHub::new();
        hub.set_enabled(false);
        hub.report(info(ErrorLevel::Critical, "a"));
        assert_eq!(hub.stats().total_errors, 0);
        hub.set_enabled(true);
        hub.report(info(ErrorLevel::Critical, "a"));
        assert_eq!(hub.stats().total_errors, 1);
    }

    #[test]
    fn subscribers_see_every_report() {
        let hub = ErrorHub::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        hub.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        hub.report(info(ErrorLevel::Info, "a"));
        hub.report(info(ErrorLevel::Error, "b"));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        hub.clear_subscribers();
        hub.report(info(ErrorLevel::Error, "b"));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_subscriber_does_not_poison_the_hub() {
        let hub = ErrorHub::new();
        hub.subscribe(|_| panic!("boom"));
        hub.report(info(ErrorLevel::Error, "a"));
        assert_eq!(hub.stats().total_errors, 1);
    }

    #[test]
    fn component_ring_is_bounded() {
        let hub = ErrorHub::new();
        for _ in 0..(MAX_COMPONENT_ERRORS + 25) {
            hub.report(info(ErrorLevel::Info, "chatty"));
        }
        assert_eq!(
            hub.errors_by_component("chatty").len(),
            MAX_COMPONENT_ERRORS
        );
        assert!(hub.has_errors("chatty"));
        assert!(!hub.has_errors("quiet"));
        assert_eq!(
            hub.count("chatty", ErrorLevel::Info),
            MAX_COMPONENT_ERRORS
        );
    }

    #[test]
    fn recent_returns_newest_slice() {
        let hub = ErrorHub::new();
        for i in 0..10 {
            hub.report(ErrorInfo::new(
                ErrorLevel::Info,
                ErrorCategory::Unknown,
                "a",
                "op",
                format!("msg {i}"),
            ));
        }
        let recent = hub.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[2].message, "msg 9");
        assert_eq!(recent[0].message, "msg 7");
    }

    #[test]
    fn reset_clears_rings_and_stats() {
        let hub = ErrorHub::new();
        hub.report(info(ErrorLevel::Error, "a"));
        hub.reset_stats();
        assert_eq!(hub.stats().total_errors, 0);
        assert!(hub.errors_by_component("a").is_empty());
    }
}
