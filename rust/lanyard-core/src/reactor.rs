//! The shared execution context for all I/O, timers and deferred work.
//!
//! A reactor is one dedicated thread driving a current-thread tokio
//! runtime. Every session and server driver is spawned onto it, so all
//! their state transitions and user callbacks happen on that single
//! thread; other threads interact only by posting work.
//!
//! Ordinary use goes through the process-wide [`Reactor::shared`]
//! instance, started lazily on first use. Tests that need isolation
//! create throwaway reactors with [`Reactor::independent`].

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::runtime;
use tokio::sync::oneshot;
use tracing::debug;

use crate::hub::report_system_error;

static SHARED: Lazy<Reactor> = Lazy::new(|| {
    Reactor::independent().expect("failed to start the shared lanyard reactor")
});

struct ReactorThread {
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

/// Handle to one event-loop thread.
pub struct Reactor {
    handle: runtime::Handle,
    running: Arc<AtomicBool>,
    thread: Mutex<ReactorThread>,
}

impl Reactor {
    /// The process-wide reactor, started on first use.
    pub fn shared() -> &'static Reactor {
        &SHARED
    }

    /// A fresh, isolated reactor with its own thread. Shares nothing with
    /// the singleton; intended for tests and embedders that need
    /// isolation.
    pub fn independent() -> io::Result<Reactor> {
        let rt = runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;
        let handle = rt.handle().clone();
        let running = Arc::new(AtomicBool::new(true));
        // The receiver is the work guard: the loop stays alive, even with
        // no I/O pending, until `stop()` resolves it.
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread_running = running.clone();
        let thread = std::thread::Builder::new()
            .name("lanyard-reactor".into())
            .spawn(move || {
                rt.block_on(async {
                    let _ = shutdown_rx.await;
                });
                thread_running.store(false, Ordering::Release);
                debug!("reactor thread exiting");
            })?;

        Ok(Reactor {
            handle,
            running,
            thread: Mutex::new(ReactorThread {
                shutdown: Some(shutdown_tx),
                thread: Some(thread),
            }),
        })
    }

    /// Whether the loop thread is alive.
    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn a future onto the reactor thread.
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Enqueue a work item guaranteed to execute on the reactor thread.
    ///
    /// Items posted from one thread run in FIFO order relative to each
    /// other. A panicking task is isolated by the runtime and reported;
    /// the loop keeps running.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        let join = self.handle.spawn(async move { task() });
        self.handle.spawn(async move {
            if let Err(err) = join.await {
                if err.is_panic() {
                    report_system_error("reactor", "post", "posted task panicked", None);
                }
            }
        });
    }

    /// Runtime handle for timer/IO construction on this reactor.
    pub fn handle(&self) -> &runtime::Handle {
        &self.handle
    }

    /// Release the work guard and join the loop thread.
    ///
    /// Idempotent; safe from any thread except the reactor thread itself.
    pub fn stop(&self) {
        let (shutdown, thread) = {
            let mut guard = self.thread.lock();
            (guard.shutdown.take(), guard.thread.take())
        };
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
        if let Some(thread) = thread {
            // Joining from a task on the loop itself would deadlock;
            // detach in that case and let the guard release do the work.
            if thread.thread().id() != std::thread::current().id() {
                let _ = thread.join();
            }
        }
        self.running.store(false, Ordering::Release);
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        // Dropping the guard sender is enough to let the thread park out;
        // detach rather than join so drops on the reactor thread cannot
        // deadlock.
        let mut guard = self.thread.lock();
        guard.shutdown.take();
        guard.thread.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn posts_run_in_fifo_order() {
        let reactor = Reactor::independent().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = std::sync::mpsc::channel();
        for i in 0..10 {
            let log = log.clone();
            let tx = tx.clone();
            reactor.post(move || {
                log.lock().push(i);
                if i == 9 {
                    let _ = tx.send(());
                }
            });
        }
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
        reactor.stop();
        assert!(!reactor.running());
    }

    #[test]
    fn survives_a_panicking_task() {
        let reactor = Reactor::independent().unwrap();
        reactor.post(|| panic!("task panic"));
        let ran = Arc::new(AtomicUsize::new(0));
        let probe = ran.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        reactor.post(move || {
            probe.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        reactor.stop();
    }

    #[test]
    fn independent_reactors_are_isolated() {
        let a = Reactor::independent().unwrap();
        let b = Reactor::independent().unwrap();
        assert!(a.running());
        assert!(b.running());
        a.stop();
        assert!(!a.running());
        assert!(b.running());
        b.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let reactor = Reactor::independent().unwrap();
        reactor.stop();
        reactor.stop();
        assert!(!reactor.running());
    }
}
