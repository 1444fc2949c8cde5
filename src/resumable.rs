//! Suspendable units of sequential execution.
//!
//! Every [`Resumable`] owns a stackful coroutine. [`Resumable::resume`]
//! switches to the body's stack on the calling thread and runs it until the
//! body calls [`suspend`] or returns, so the body always executes on
//! whichever thread resumed it last and sees that thread's thread-locals.
//! Because the body keeps its own stack, [`suspend`] can be called from any
//! call depth inside the body.
use crate::Builder;
use ::generator::Gn;
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// What the coroutine hands back to its resumer on each switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transfer {
    Suspended,
    Finished,
}

type Outcome<R> = Arc<Mutex<Option<thread::Result<R>>>>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Id of the computation running on this thread, 0 when none.
    static CURRENT: Cell<u64> = Cell::new(0);
}

/// Marks a computation as current on this thread until dropped, then
/// restores whatever was current before.
struct CurrentGuard {
    prev: u64,
}

impl CurrentGuard {
    fn enter(id: u64) -> Self {
        CurrentGuard {
            prev: CURRENT.with(|current| current.replace(id)),
        }
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT.with(|current| current.set(self.prev));
    }
}

pub(crate) fn current_id() -> Option<u64> {
    match CURRENT.with(Cell::get) {
        0 => None,
        id => Some(id),
    }
}

/// Whether a caught panic is the coroutine runtime unwinding an abandoned
/// body rather than a failure of the body itself.
pub(crate) fn is_abandoned(payload: &(dyn Any + Send)) -> bool {
    payload.is::<::generator::Error>()
}

/// Hands control back to whoever last resumed the current computation.
///
/// Returns once the computation is resumed again, possibly on another
/// thread. Callable from any depth inside a [`Resumable`] body.
///
/// # Panics
///
/// Panics if the caller is not running inside a resumable computation.
pub fn suspend() {
    let Some(id) = current_id() else {
        panic!("suspend called outside of a resumable computation");
    };
    tracing::trace!(id, "resumable suspending");
    ::generator::yield_with(Transfer::Suspended);
    tracing::trace!(id, "resumable resumed");
}

/// Whether the calling code runs inside a resumable computation.
pub fn in_resumable() -> bool {
    current_id().is_some()
}

/// A suspendable computation producing an `R`.
///
/// States: not started, running, suspended, finished. Only the owner may
/// resume it, and only until it has finished.
///
/// # Examples
///
/// ```
/// use promise_await::{suspend, Resumable};
/// use std::sync::{Arc, Mutex};
///
/// let out = Arc::new(Mutex::new(0));
/// let shared = out.clone();
/// let mut fib = Resumable::new(move || {
///     let (mut a, mut b) = (0, 1);
///     for _ in 0..5 {
///         *shared.lock().unwrap() = a;
///         suspend();
///         (a, b) = (b, a + b);
///     }
///     "done"
/// });
/// let mut seen = vec![];
/// while !fib.ready() {
///     seen.push(*out.lock().unwrap());
///     fib.resume();
/// }
/// assert_eq!(seen, vec![0, 1, 1, 2, 3]);
/// assert_eq!(fib.result(), "done");
/// ```
pub struct Resumable<R> {
    id: u64,
    coroutine: ::generator::Generator<'static, (), Transfer>,
    outcome: Outcome<R>,
    finished: bool,
}

impl<R> Resumable<R>
where
    R: Send + 'static,
{
    /// Creates the computation and runs `body` until it finishes or first
    /// suspends.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
    {
        Builder::new().create(body)
    }

    /// Creates the computation without running it. The first
    /// [`resume`](Resumable::resume) starts `body`.
    pub fn paused<F>(body: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
    {
        Builder::new().create_paused(body)
    }

    pub(crate) fn start<F>(stack_size: usize, body: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
    {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let outcome: Outcome<R> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&outcome);
        // The coroutine runtime measures stacks in words.
        let words = stack_size / std::mem::size_of::<usize>();
        let coroutine = Gn::<()>::new_opt(words, move || {
            tracing::trace!(id, "resumable started");
            match panic::catch_unwind(AssertUnwindSafe(body)) {
                Err(payload) if is_abandoned(&*payload) => panic::resume_unwind(payload),
                result => {
                    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
                }
            }
            Transfer::Finished
        });
        Resumable {
            id,
            coroutine,
            outcome,
            finished: false,
        }
    }

    /// Continues the body from its last suspension point, on the calling
    /// thread, until it suspends again or finishes.
    ///
    /// # Panics
    ///
    /// Panics if the computation has already finished.
    pub fn resume(&mut self) {
        assert!(
            !self.finished,
            "resume called on a finished resumable computation"
        );
        let transfer = {
            let _current = CurrentGuard::enter(self.id);
            self.coroutine.resume()
        };
        if transfer != Some(Transfer::Suspended) {
            self.finished = true;
            tracing::trace!(id = self.id, "resumable finished");
        }
    }

    /// Takes the body's outcome without re-raising a panic.
    pub(crate) fn take_outcome(&mut self) -> Option<thread::Result<R>> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl<R> Resumable<R> {
    /// Whether the body has run to completion, normally or by panicking.
    pub fn ready(&self) -> bool {
        self.finished
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Takes the value the body returned.
    ///
    /// # Panics
    ///
    /// Panics if the computation is not finished or its result was already
    /// taken. If the body panicked, the original panic is resumed here.
    pub fn result(&mut self) -> R {
        assert!(self.finished, "result requested before the computation finished");
        let outcome = self
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match outcome {
            Some(Ok(value)) => value,
            Some(Err(payload)) => panic::resume_unwind(payload),
            None => panic!("result of a resumable computation already taken"),
        }
    }
}

impl<R> Drop for Resumable<R> {
    fn drop(&mut self) {
        if !self.finished && !self.coroutine.is_done() {
            // Dropping the coroutine unwinds a suspended body on this thread.
            tracing::debug!(id = self.id, "dropping unfinished resumable");
        }
    }
}

impl<R> fmt::Debug for Resumable<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resumable")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{in_resumable, suspend, Resumable};
    use crate::Builder;
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[test]
    fn test_no_suspension_completes_on_create() {
        let mut r = Resumable::new(|| 42);
        assert!(r.ready());
        assert_eq!(r.result(), 42);
    }

    #[test]
    fn test_paused_does_not_run() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let mut r = Resumable::paused(move || counter.fetch_add(1, Ordering::SeqCst));
        assert!(!r.ready());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        r.resume();
        assert!(r.ready());
        assert_eq!(r.result(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    fn nested_helper(depth: usize, log: &Mutex<Vec<usize>>) {
        if depth == 0 {
            return;
        }
        log.lock().unwrap().push(depth);
        suspend();
        nested_helper(depth - 1, log);
    }

    #[test]
    fn test_suspend_at_depth() {
        let log = Arc::new(Mutex::new(vec![]));
        let inner = log.clone();
        let mut r = Resumable::new(move || {
            assert!(in_resumable());
            nested_helper(3, &inner);
            "bottom"
        });
        assert_eq!(*log.lock().unwrap(), vec![3]);
        r.resume();
        assert_eq!(*log.lock().unwrap(), vec![3, 2]);
        r.resume();
        assert_eq!(*log.lock().unwrap(), vec![3, 2, 1]);
        assert!(!r.ready());
        r.resume();
        assert!(r.ready());
        assert_eq!(r.result(), "bottom");
        assert!(!in_resumable());
    }

    #[test]
    fn test_nested_resumable() {
        let mut outer = Resumable::new(|| {
            let mut inner = Resumable::new(|| {
                suspend();
                1
            });
            suspend();
            assert!(in_resumable());
            inner.resume();
            inner.result() + 1
        });
        assert!(!outer.ready());
        outer.resume();
        assert_eq!(outer.result(), 2);
    }

    #[test]
    fn test_body_runs_on_resuming_thread() {
        thread_local! {
            static TAG: Cell<u32> = Cell::new(0);
        }
        TAG.with(|tag| tag.set(7));
        let caller = thread::current().id();
        let mut r = Resumable::new(move || {
            let first = (thread::current().id(), TAG.with(Cell::get));
            suspend();
            let second = (thread::current().id(), TAG.with(Cell::get));
            (first, second)
        });
        let task1 = thread::spawn(move || {
            TAG.with(|tag| tag.set(9));
            r.resume();
            (thread::current().id(), r.result())
        });
        let (resumer, (first, second)) = task1.join().expect("The task1 thread has panicked");
        assert_eq!(first, (caller, 7));
        assert_eq!(second, (resumer, 9));
    }

    #[test]
    #[should_panic(expected = "resume called on a finished resumable computation")]
    fn test_resume_after_finish_panics() {
        let mut r = Resumable::new(|| ());
        r.resume();
    }

    #[test]
    #[should_panic(expected = "suspend called outside of a resumable computation")]
    fn test_suspend_outside_panics() {
        suspend();
    }

    #[test]
    fn test_body_panic_surfaces_in_result() {
        let mut r = Resumable::new(|| -> i32 {
            suspend();
            panic!("body failed");
        });
        r.resume();
        assert!(r.ready());
        let payload = panic::catch_unwind(AssertUnwindSafe(|| r.result())).unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"body failed"));
    }

    struct Flag(Arc<AtomicUsize>);

    impl Drop for Flag {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_drop_unwinds_suspended_body() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let flag = Flag(dropped.clone());
        let r = Resumable::new(move || {
            let _flag = flag;
            for _ in 0..usize::MAX {
                suspend();
            }
        });
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        drop(r);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_paused_never_runs() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let r = Resumable::paused(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(r);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_many_suspended_computations() {
        let builder = Builder::new().stack_size(32 * 1024);
        let mut all: Vec<_> = (0..3000)
            .map(|i| {
                builder.create(move || {
                    suspend();
                    i * 2
                })
            })
            .collect();
        assert!(all.iter().all(|r| !r.ready()));
        let total: usize = all
            .iter_mut()
            .map(|r| {
                r.resume();
                r.result()
            })
            .sum();
        assert_eq!(total, 3000 * 2999);
    }
}
