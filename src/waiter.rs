//! The handshake between a resumable computation and the events it awaits.
//!
//! A computation about to wait calls [`Waiter::prepare`], registers a
//! completion callback that ends in [`Waiter::notify`], then calls
//! [`Waiter::wait`]. All flag transitions happen under one mutex, so no
//! matter whether the completion lands before or after the computation
//! reaches `wait`, it is resumed exactly once:
//!
//! * completion first: `notify` finds `WaitPending`, flips to `Running`,
//!   and `wait` returns without suspending;
//! * suspension first: `wait` flips to `Waiting` and suspends, `notify`
//!   finds `Waiting` and drives the computation on the completing thread.
use crate::{Builder, Error, Resumable};
use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WaitState {
    Running,
    WaitPending,
    Waiting,
}

#[derive(Debug)]
struct Flags {
    state: WaitState,
    /// A thread is inside the drive loop.
    driving: bool,
}

thread_local! {
    static ACTIVE: RefCell<Option<Arc<Waiter>>> = RefCell::new(None);
}

/// Restores the previously active waiter when dropped, on every exit path.
struct ActiveGuard {
    prev: Option<Arc<Waiter>>,
}

impl ActiveGuard {
    fn enter(waiter: Arc<Waiter>) -> Self {
        let prev = ACTIVE.with(|active| active.borrow_mut().replace(waiter));
        ActiveGuard { prev }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        let current = ACTIVE.with(|active| std::mem::replace(&mut *active.borrow_mut(), prev));
        drop(current);
    }
}

/// Owns one resumable computation and resumes it when what it awaits
/// completes.
///
/// Whichever thread drives the computation marks this waiter active for
/// the duration of each resumption, so code running in the body finds it
/// through [`Waiter::active`] on that thread.
pub struct Waiter {
    resumable: Mutex<Option<Resumable<()>>>,
    flags: Mutex<Flags>,
}

impl Waiter {
    /// Starts `body` as a new computation driven by a fresh waiter. Returns
    /// once the body has finished or is waiting.
    pub(crate) fn launch<F>(builder: &Builder, body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let waiter = Arc::new(Waiter {
            resumable: Mutex::new(Some(builder.create_paused(body))),
            flags: Mutex::new(Flags {
                state: WaitState::Running,
                driving: false,
            }),
        });
        waiter.resume();
    }

    /// The waiter owning the computation the caller runs in, if any.
    pub fn active() -> Option<Arc<Waiter>> {
        ACTIVE.with(|active| active.borrow().clone())
    }

    fn is_active(this: &Arc<Self>) -> bool {
        ACTIVE.with(|active| {
            active
                .borrow()
                .as_ref()
                .map_or(false, |active| Arc::ptr_eq(active, this))
        })
    }

    fn lock_flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_resumable(&self) -> MutexGuard<'_, Option<Resumable<()>>> {
        self.resumable.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks that a wait is about to begin, before its completion callback
    /// is registered.
    pub fn prepare(&self) {
        self.lock_flags().state = WaitState::WaitPending;
    }

    /// Suspends the calling computation unless the awaited completion has
    /// already been signalled.
    ///
    /// Takes the caller's handle so that, while suspended, the computation
    /// is kept alive only by whoever will [`notify`](Waiter::notify) it.
    ///
    /// # Panics
    ///
    /// Panics when called outside the computation this waiter owns. The
    /// waiter and the active marker are left untouched in that case.
    pub fn wait(this: Arc<Self>) {
        assert!(
            Self::is_active(&this),
            "wait called outside the waiter's own computation"
        );
        {
            let mut flags = this.lock_flags();
            if flags.state == WaitState::Running {
                return;
            }
            flags.state = WaitState::Waiting;
        }
        let active = ACTIVE.with(|active| active.borrow_mut().take());
        drop(active);
        drop(this);
        crate::resumable::suspend();
    }

    /// Signals that the awaited completion happened. May be called from any
    /// thread; if the computation already suspended, the calling thread
    /// resumes it.
    pub fn notify(self: &Arc<Self>) {
        let was_waiting = {
            let mut flags = self.lock_flags();
            let was_waiting = flags.state == WaitState::Waiting;
            flags.state = WaitState::Running;
            was_waiting
        };
        if was_waiting {
            tracing::trace!("waiter notified while waiting, resuming");
            self.resume();
        }
    }

    /// Drives the computation on the calling thread until it finishes or
    /// waits.
    ///
    /// A call made while another call is already driving only leaves the
    /// flag at `Running`, which keeps the running loop going.
    pub(crate) fn resume(self: &Arc<Self>) {
        {
            let mut flags = self.lock_flags();
            if flags.driving {
                return;
            }
            flags.driving = true;
        }
        let mut slot = self.lock_resumable();
        loop {
            let finished = match slot.as_mut() {
                Some(resumable) if !resumable.ready() => {
                    let _active = ActiveGuard::enter(Arc::clone(self));
                    resumable.resume();
                    resumable.ready()
                }
                _ => true,
            };
            let mut flags = self.lock_flags();
            if finished || flags.state == WaitState::Waiting {
                flags.driving = false;
                break;
            }
        }
        if let Some(resumable) = slot.as_mut().filter(|resumable| resumable.ready()) {
            if let Some(Err(payload)) = resumable.take_outcome() {
                tracing::warn!("{}", Error::from_panic(payload));
            }
        }
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = self.lock_flags();
        f.debug_struct("Waiter")
            .field("state", &flags.state)
            .field("driving", &flags.driving)
            .finish()
    }
}
