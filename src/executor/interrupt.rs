//! Cooperative interruption of running work.
//!
//! Threads cannot be stopped from the outside. Instead every unit of work
//! run by a [`TaskExecutor`](super::TaskExecutor) gets a fresh [`Interrupt`]
//! handle, reachable from inside the unit through [`current_interrupt`].
//! Interrupting the handle sets a flag and wakes any [`Interrupt::sleep`] in
//! progress; the work notices and unwinds, usually by returning
//! [`Interrupted`].

use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::Interrupted;

#[derive(Debug, Default)]
struct InterruptState {
    interrupted: Mutex<bool>,
    wake: Condvar,
}

/// Shared interruption flag for one unit of work.
///
/// Clones share the same flag.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use background_tasks::executor::Interrupt;
///
/// let interrupt = Interrupt::new();
/// let remote = interrupt.clone();
/// assert!(!interrupt.is_interrupted());
///
/// remote.interrupt();
/// assert!(interrupt.is_interrupted());
/// assert!(interrupt.sleep(Duration::from_secs(60)).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    state: Arc<InterruptState>,
}

impl Interrupt {
    /// Creates a handle that is not interrupted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes sleepers. Idempotent.
    pub fn interrupt(&self) {
        *self.state.interrupted.lock() = true;
        self.state.wake.notify_all();
    }

    /// Whether [`interrupt`](Self::interrupt) has been called.
    pub fn is_interrupted(&self) -> bool {
        *self.state.interrupted.lock()
    }

    /// Returns `Err(Interrupted)` if the flag is set.
    ///
    /// Convenient as a checkpoint inside loops: `interrupt.check()?;`.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_interrupted() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration`, returning early with `Err(Interrupted)` if the
    /// handle is interrupted before or during the sleep.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now().checked_add(duration);
        let mut interrupted = self.state.interrupted.lock();
        while !*interrupted {
            match deadline {
                Some(deadline) => {
                    if self
                        .state
                        .wake
                        .wait_until(&mut interrupted, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
                None => self.state.wake.wait(&mut interrupted),
            }
        }
        if *interrupted {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Interrupt>> = const { RefCell::new(None) };
}

/// Installs `interrupt` as the current thread's handle until the guard drops.
pub(crate) struct CurrentInterruptGuard {
    previous: Option<Interrupt>,
}

impl CurrentInterruptGuard {
    pub(crate) fn install(interrupt: Interrupt) -> Self {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(interrupt));
        Self { previous }
    }
}

impl Drop for CurrentInterruptGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

/// The interrupt handle of the unit of work running on this thread.
///
/// Returns `None` outside executor workers.
pub fn current_interrupt() -> Option<Interrupt> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Whether the unit of work running on this thread has been interrupted.
///
/// Always `false` outside executor workers.
pub fn is_interrupted() -> bool {
    current_interrupt().is_some_and(|interrupt| interrupt.is_interrupted())
}

/// Sleeps on the current unit's interrupt handle.
///
/// Outside executor workers this is a plain, uninterruptible sleep.
pub fn sleep_interruptibly(duration: Duration) -> Result<(), Interrupted> {
    match current_interrupt() {
        Some(interrupt) => interrupt.sleep(duration),
        None => {
            std::thread::sleep(duration);
            Ok(())
        }
    }
}
