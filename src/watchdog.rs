use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::info;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(120_000);

type ExpiryAction = Box<dyn FnOnce(Duration) + Send>;

struct Shared {
    done: Mutex<bool>,
    cv: Condvar,
    timed_out: AtomicBool,
}

/// Background timer that ends the process when a run outlives its ceiling.
///
/// A successfully induced hang blocks the main thread forever, so the
/// watchdog is the only way out. The default expiry action logs and calls
/// `process::exit(0)`, which skips unwinding and destructors.
pub struct Watchdog {
    timeout: Duration,
    shared: Arc<Shared>,
    action: Option<ExpiryAction>,
    thread: Option<JoinHandle<()>>,
    disarmed: bool,
}

fn terminate(timeout: Duration) {
    info!(
        "Test watchdog expired [{} ms]. Terminating the test.",
        timeout.as_millis()
    );
    std::process::exit(0);
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self::with_action(timeout, terminate)
    }

    /// Watchdog with a custom expiry action instead of process exit.
    pub fn with_action<F>(timeout: Duration, action: F) -> Self
    where
        F: FnOnce(Duration) + Send + 'static,
    {
        Self {
            timeout,
            shared: Arc::new(Shared {
                done: Mutex::new(false),
                cv: Condvar::new(),
                timed_out: AtomicBool::new(false),
            }),
            action: Some(Box::new(action)),
            thread: None,
            disarmed: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Starts the timer thread. Only the first call has any effect.
    pub fn arm(&mut self) {
        let Some(action) = self.action.take() else {
            return;
        };
        if self.disarmed {
            return;
        }

        info!("Begin test watchdog [{} ms]", self.timeout.as_millis());
        let shared = Arc::clone(&self.shared);
        let timeout = self.timeout;
        self.thread = Some(std::thread::spawn(move || {
            let deadline = Instant::now() + timeout;
            let mut done = match shared.done.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            while !*done {
                let now = Instant::now();
                if now >= deadline {
                    shared.timed_out.store(true, Ordering::SeqCst);
                    drop(done);
                    action(timeout);
                    return;
                }
                done = match shared.cv.wait_timeout(done, deadline - now) {
                    Ok((g, _)) => g,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
        }));
    }

    pub fn timed_out(&self) -> bool {
        self.shared.timed_out.load(Ordering::SeqCst)
    }

    /// Stops the timer and joins its thread. Runs at most once and does
    /// nothing if the timer already fired.
    pub fn disarm(&mut self) {
        if std::mem::replace(&mut self.disarmed, true) {
            return;
        }
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.timed_out() {
            return;
        }

        info!("Waiting for the watchdog thread to finish...");
        {
            let mut done = match self.shared.done.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            *done = true;
        }
        self.shared.cv.notify_all();
        let _ = thread.join();
        info!("Done.");
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_after_timeout() {
        let (tx, rx) = mpsc::channel();
        let mut dog = Watchdog::with_action(Duration::from_millis(20), move |t| {
            let _ = tx.send(t);
        });
        dog.arm();
        let fired = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(fired, Duration::from_millis(20));
        assert!(dog.timed_out());
        // disarm after expiry is a no-op
        dog.disarm();
    }

    #[test]
    fn disarm_prevents_expiry() {
        let (tx, rx) = mpsc::channel::<()>();
        let mut dog = Watchdog::with_action(Duration::from_secs(60), move |_| {
            let _ = tx.send(());
        });
        dog.arm();
        let start = Instant::now();
        dog.disarm();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!dog.timed_out());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn arm_is_idempotent() {
        let (tx, rx) = mpsc::channel();
        let mut dog = Watchdog::with_action(Duration::from_millis(10), move |_| {
            let _ = tx.send(());
        });
        dog.arm();
        dog.arm();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        drop(dog);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn drop_without_arm() {
        let dog = Watchdog::new(Duration::from_millis(1));
        drop(dog);
    }
}
