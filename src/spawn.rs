//! Starting awaiting computations and awaiting inside them.
use crate::{make_promise, Builder, Error, Failure, Future, Waiter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

/// Starts `body` as a new resumable computation and returns a future for
/// its result.
///
/// `body` runs right away on the calling thread and may already be
/// suspended in [`await_future`] when `spawn` returns; after each await it
/// continues on the thread that completed the awaited future. A panic
/// inside `body` completes the future with [`Error::Panicked`], which keeps
/// the original payload.
///
/// # Examples
///
/// ```
/// use promise_await::spawn;
///
/// assert_eq!(spawn(|| 42).get().unwrap(), 42);
/// ```
pub fn spawn<F, R>(body: F) -> Future<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    Builder::new().spawn(body)
}

/// Like [`spawn`] for a body that can fail. An `Err` completes the future
/// with [`Error::Failed`] holding the original error.
pub fn try_spawn<F, R, E>(body: F) -> Future<R>
where
    F: FnOnce() -> Result<R, E> + Send + 'static,
    R: Send + 'static,
    E: Into<Failure>,
{
    Builder::new().try_spawn(body)
}

pub(crate) fn spawn_with<F, R>(builder: &Builder, body: F) -> Future<R>
where
    F: FnOnce() -> Result<R, Error> + Send + 'static,
    R: Send + 'static,
{
    let (promise, future) = make_promise();
    Waiter::launch(builder, move || {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(outcome) => outcome,
            Err(payload) if crate::resumable::is_abandoned(&*payload) => {
                panic::resume_unwind(payload)
            }
            Err(payload) => Err(Error::from_panic(payload)),
        };
        let _ = promise.set_outcome(outcome);
    });
    future
}

/// Suspends the current computation until `future` is ready and returns its
/// outcome.
///
/// The worker running the computation is not blocked: if the future is not
/// ready yet, control goes back to whoever resumed the computation, and the
/// thread that later completes the future resumes it. Works at any call
/// depth inside a [`spawn`]ed body.
///
/// # Panics
///
/// Panics when not called from inside a spawned computation.
///
/// # Examples
///
/// ```
/// use promise_await::{await_future, spawn, Future};
///
/// fn double(n: i32) -> i32 {
///     await_future(Future::ready(n)).unwrap() * 2
/// }
///
/// assert_eq!(spawn(|| double(21)).get().unwrap(), 42);
/// ```
pub fn await_future<T>(future: Future<T>) -> Result<T, Error>
where
    T: Send + 'static,
{
    let Some(waiter) = Waiter::active() else {
        panic!("await_future called outside of a spawned computation");
    };
    if !future.valid() {
        return Err(Error::Empty);
    }
    let slot = Arc::new(Mutex::new(None));
    waiter.prepare();
    {
        let waiter = Arc::clone(&waiter);
        let slot = Arc::clone(&slot);
        future.then(move |ready| {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(ready.get());
            waiter.notify();
        })?;
    }
    Waiter::wait(waiter);
    let outcome = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    outcome.unwrap_or(Err(Error::Empty))
}
