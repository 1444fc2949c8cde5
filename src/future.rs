//! One-shot, thread-safe handoff of a value or an error from a [`Promise`]
//! to a single [`Future`], with an optional continuation.
use crate::{Error, Failure};
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

type Continuation<T> = Box<dyn FnOnce(Future<T>) + Send>;

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
}

struct Inner<T> {
    outcome: Option<Result<T, Error>>,
    satisfied: bool,
    continuation: Option<Continuation<T>>,
    waker: Option<Waker>,
}

impl<T> Shared<T> {
    fn new() -> Arc<Self> {
        Arc::new(Shared {
            inner: Mutex::new(Inner {
                outcome: None,
                satisfied: false,
                continuation: None,
                waker: None,
            }),
            ready: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_ready(&self) -> MutexGuard<'_, Inner<T>> {
        let mut inner = self.lock();
        while !inner.satisfied {
            inner = self.ready.wait(inner).unwrap_or_else(PoisonError::into_inner);
        }
        inner
    }
}

/// Writes `outcome` once, wakes blocked readers, then runs the registered
/// continuation outside the lock.
fn complete<T>(shared: &Arc<Shared<T>>, outcome: Result<T, Error>) -> Result<(), Error> {
    let (continuation, waker) = {
        let mut inner = shared.lock();
        if inner.satisfied {
            return Err(Error::AlreadySatisfied);
        }
        inner.outcome = Some(outcome);
        inner.satisfied = true;
        shared.ready.notify_all();
        (inner.continuation.take(), inner.waker.take())
    };
    if let Some(waker) = waker {
        waker.wake();
    }
    if let Some(continuation) = continuation {
        tracing::trace!("running continuation on completing thread");
        continuation(Future {
            shared: Some(Arc::clone(shared)),
        });
    }
    Ok(())
}

/// The producing half. Completes its [`Future`] exactly once.
///
/// Dropping a promise that was never satisfied completes the future with
/// [`Error::BrokenPromise`], so nobody blocks on a value that cannot arrive.
///
/// # Examples
///
/// ```
/// use promise_await::Promise;
/// use std::thread;
///
/// let mut promise = Promise::<String>::new();
/// let future = promise.get_future().unwrap();
/// let task1 = thread::spawn(move || future.get().unwrap());
/// promise.set_value("🍓".into()).unwrap();
/// assert_eq!(task1.join().expect("The task1 thread has panicked"), "🍓");
/// ```
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
    retrieved: bool,
}

impl<T> Promise<T> {
    pub fn new() -> Self {
        Promise {
            shared: Shared::new(),
            retrieved: false,
        }
    }

    /// Hands out the consuming half. Only one future exists per promise.
    pub fn get_future(&mut self) -> Result<Future<T>, Error> {
        if self.retrieved {
            return Err(Error::AlreadyRetrieved);
        }
        self.retrieved = true;
        Ok(Future {
            shared: Some(Arc::clone(&self.shared)),
        })
    }

    pub fn set_value(&self, value: T) -> Result<(), Error> {
        complete(&self.shared, Ok(value))
    }

    /// Stores a user failure; the future yields it back as [`Error::Failed`].
    pub fn set_error(&self, err: impl Into<Failure>) -> Result<(), Error> {
        complete(&self.shared, Err(Error::Failed(err.into())))
    }

    /// Completes with an arbitrary outcome, including crate errors.
    pub fn set_outcome(&self, outcome: Result<T, Error>) -> Result<(), Error> {
        complete(&self.shared, outcome)
    }

    pub fn is_satisfied(&self) -> bool {
        self.shared.lock().satisfied
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.is_satisfied() {
            return;
        }
        tracing::debug!("promise dropped before it was satisfied");
        let _ = complete(&self.shared, Err(Error::BrokenPromise));
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("satisfied", &self.is_satisfied())
            .field("retrieved", &self.retrieved)
            .finish()
    }
}

/// Creates a pending promise together with its future.
pub fn make_promise<T>() -> (Promise<T>, Future<T>) {
    let shared = Shared::new();
    let future = Future {
        shared: Some(Arc::clone(&shared)),
    };
    (
        Promise {
            shared,
            retrieved: true,
        },
        future,
    )
}

/// The consuming half. Retrieving the outcome consumes the handle.
///
/// Besides blocking with [`get`](Future::get) or chaining with
/// [`then`](Future::then), a future can be awaited by any executor:
///
/// ```
/// use promise_await::make_promise;
/// use futures::executor::block_on;
/// use std::thread;
///
/// let (promise, future) = make_promise::<u8>();
/// let task1 = thread::spawn(move || block_on(async { future.await.unwrap() }));
/// promise.set_value(3).unwrap();
/// assert_eq!(task1.join().expect("The task1 thread has panicked"), 3);
/// ```
pub struct Future<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Future<T> {
    /// A future that is already satisfied with `value`.
    pub fn ready(value: T) -> Self {
        Self::from_outcome(Ok(value))
    }

    pub(crate) fn from_outcome(outcome: Result<T, Error>) -> Self {
        let shared = Shared::new();
        {
            let mut inner = shared.lock();
            inner.outcome = Some(outcome);
            inner.satisfied = true;
        }
        Future {
            shared: Some(shared),
        }
    }

    /// Whether this handle still refers to a shared state.
    pub fn valid(&self) -> bool {
        self.shared.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.shared
            .as_ref()
            .map_or(false, |shared| shared.lock().satisfied)
    }

    /// Blocks until the outcome is known and returns it.
    pub fn get(mut self) -> Result<T, Error> {
        let shared = self.shared.take().ok_or(Error::Empty)?;
        let mut inner = shared.wait_ready();
        inner.outcome.take().unwrap_or(Err(Error::Empty))
    }

    /// Blocks until the outcome is known without consuming it.
    pub fn wait(&self) -> Result<(), Error> {
        let shared = self.shared.as_ref().ok_or(Error::Empty)?;
        drop(shared.wait_ready());
        Ok(())
    }

    /// Like [`wait`](Future::wait) but gives up after `timeout`. Returns
    /// whether the future became ready.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, Error> {
        let shared = self.shared.as_ref().ok_or(Error::Empty)?;
        let inner = shared.lock();
        let (inner, _) = shared
            .ready
            .wait_timeout_while(inner, timeout, |inner| !inner.satisfied)
            .unwrap_or_else(PoisonError::into_inner);
        Ok(inner.satisfied)
    }

    /// Registers `continuation` to run once with a future that observes the
    /// outcome.
    ///
    /// If the outcome is already known the continuation runs before `then`
    /// returns, on the calling thread. Otherwise it runs on the thread that
    /// later completes the promise.
    pub fn then<F>(mut self, continuation: F) -> Result<(), Error>
    where
        F: FnOnce(Future<T>) + Send + 'static,
    {
        let shared = self.shared.take().ok_or(Error::Empty)?;
        let mut inner = shared.lock();
        if inner.satisfied {
            drop(inner);
            continuation(Future {
                shared: Some(shared),
            });
        } else {
            inner.continuation = Some(Box::new(continuation));
        }
        Ok(())
    }
}

impl<T> Default for Future<T> {
    /// An empty handle; every operation on it fails with [`Error::Empty`].
    fn default() -> Self {
        Future { shared: None }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("valid", &self.valid())
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl<T> std::future::Future for Future<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(shared) = this.shared.as_ref() else {
            return Poll::Ready(Err(Error::Empty));
        };
        let mut inner = shared.lock();
        if inner.satisfied {
            let outcome = inner.outcome.take().unwrap_or(Err(Error::Empty));
            drop(inner);
            this.shared = None;
            Poll::Ready(outcome)
        } else {
            inner.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}
