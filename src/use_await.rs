//! Adapting callback-style asynchronous operations to [`await_future`]
//! style code.
//!
//! An operation that reports completion by calling a handler with an
//! optional error and some results is given an [`AwaitHandler`] bound to
//! the active [`Waiter`]. The paired [`AwaitResult`] suspends the
//! computation until the handler is invoked and hands back the results,
//! or the error as a failure.
//!
//! [`await_future`]: crate::await_future
use crate::{Error, Failure, Waiter};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

type Slot<T> = Arc<Mutex<Option<Result<T, Error>>>>;

/// The completion handler passed to the foreign operation. Invoke exactly
/// one of its methods; dropping it unused completes with
/// [`Error::BrokenPromise`].
pub struct AwaitHandler<T> {
    waiter: Option<Arc<Waiter>>,
    slot: Slot<T>,
}

impl<T> AwaitHandler<T> {
    fn finish(mut self, outcome: Result<T, Error>) {
        self.deliver(outcome);
    }

    fn deliver(&mut self, outcome: Result<T, Error>) {
        let Some(waiter) = self.waiter.take() else {
            return;
        };
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        waiter.notify();
    }

    /// Completes an operation whose handler carries no error indicator.
    pub fn resolve(self, value: T) {
        self.finish(Ok(value));
    }

    pub fn reject(self, err: impl Into<Failure>) {
        self.finish(Err(Error::Failed(err.into())));
    }

    pub fn complete<E>(self, result: Result<T, E>)
    where
        E: Into<Failure>,
    {
        self.finish(result.map_err(|err| Error::Failed(err.into())));
    }

    /// Completes an operation whose handler has the shape
    /// `(error_indicator, results)`: a present error wins over the results.
    pub fn complete_with<E>(self, error: Option<E>, value: T)
    where
        E: Into<Failure>,
    {
        match error {
            Some(err) => self.reject(err),
            None => self.resolve(value),
        }
    }
}

impl<T> Drop for AwaitHandler<T> {
    fn drop(&mut self) {
        if self.waiter.is_some() {
            tracing::debug!("await handler dropped without being invoked");
            self.deliver(Err(Error::BrokenPromise));
        }
    }
}

impl<T> fmt::Debug for AwaitHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwaitHandler")
            .field("pending", &self.waiter.is_some())
            .finish()
    }
}

/// The value returned to the initiating code; [`get`](AwaitResult::get)
/// suspends until the handler runs.
pub struct AwaitResult<T> {
    waiter: Arc<Waiter>,
    slot: Slot<T>,
}

impl<T> AwaitResult<T> {
    pub fn get(self) -> Result<T, Error> {
        let AwaitResult { waiter, slot } = self;
        Waiter::wait(waiter);
        let outcome = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        outcome.unwrap_or(Err(Error::Empty))
    }
}

impl<T> fmt::Debug for AwaitResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwaitResult").finish_non_exhaustive()
    }
}

/// Binds a new handler/result pair to the active waiter.
///
/// # Panics
///
/// Panics when not called from inside a spawned computation.
pub fn handler<T>() -> (AwaitHandler<T>, AwaitResult<T>) {
    let Some(waiter) = Waiter::active() else {
        panic!("use_await called outside of a spawned computation");
    };
    waiter.prepare();
    let slot = Arc::new(Mutex::new(None));
    (
        AwaitHandler {
            waiter: Some(Arc::clone(&waiter)),
            slot: Arc::clone(&slot),
        },
        AwaitResult { waiter, slot },
    )
}

/// Starts a callback-style operation with a handler bound to the current
/// computation and suspends until the operation invokes it.
///
/// # Examples
///
/// ```
/// use promise_await::{spawn, use_await};
/// use std::thread;
///
/// fn async_read(callback: impl FnOnce(Option<std::io::Error>, usize) + Send + 'static) {
///     thread::spawn(move || callback(None, 512));
/// }
///
/// let read = spawn(|| use_await(|handler| {
///     async_read(move |err, n| handler.complete_with(err, n))
/// }));
/// assert_eq!(read.get().unwrap().unwrap(), 512);
/// ```
pub fn use_await<T, F>(initiate: F) -> Result<T, Error>
where
    F: FnOnce(AwaitHandler<T>),
{
    let (handler, result) = handler();
    initiate(handler);
    result.get()
}
