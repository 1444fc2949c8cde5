//! One-shot promises, resumable computations and an `await` that works from
//! ordinary sequential code.
//!
//! A [`Promise`]/[`Future`] pair hands a single value (or error) from a
//! producer to one consumer, optionally chaining a continuation that runs on
//! whichever thread completes it. [`spawn`] starts a resumable computation;
//! inside it, [`await_future`] suspends the computation, at any call depth,
//! until a future is ready, and the thread that completes that future is the
//! one that resumes it.
//!
//! # Examples
//!
//! ```
//! use promise_await::{await_future, make_promise, spawn};
//! use std::{thread, time::Duration};
//!
//! let answer = spawn(|| {
//!     let (promise, future) = make_promise::<i32>();
//!     thread::spawn(move || {
//!         thread::sleep(Duration::from_millis(10));
//!         promise.set_value(7).unwrap();
//!     });
//!     await_future(future).unwrap() * 6
//! });
//! assert_eq!(answer.get().unwrap(), 42);
//! ```
//!
//! [`Generator`] reuses the same suspension machinery to turn a producer
//! closure into a lazy, pull-based sequence:
//!
//! ```
//! use promise_await::Generator;
//!
//! let evens = Generator::new(|co| {
//!     for n in (0..10).step_by(2) {
//!         co.yield_value(n);
//!     }
//! });
//! assert_eq!(evens.collect::<Vec<_>>(), vec![0, 2, 4, 6, 8]);
//! ```
use std::any::Any;
use std::fmt;
use std::panic;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

pub mod builder;
pub mod future;
pub mod generator;
pub mod resumable;
pub mod spawn;
pub mod use_await;
pub mod waiter;

pub use builder::{Builder, DEFAULT_STACK_SIZE};
pub use future::{make_promise, Future, Promise};
pub use generator::{Generator, Yielder};
pub use resumable::{suspend, Resumable};
pub use spawn::{await_future, spawn, try_spawn};
pub use use_await::{use_await, AwaitHandler, AwaitResult};
pub use waiter::Waiter;

/// A failure raised by user code and carried through a future unchanged.
pub type Failure = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    /// The handle holds no shared state, or its value was already consumed.
    #[error("future has no shared state")]
    Empty,
    #[error("future already retrieved")]
    AlreadyRetrieved,
    #[error("promise already satisfied")]
    AlreadySatisfied,
    /// The promise was dropped before a value or an error was set.
    #[error("promise dropped without being satisfied")]
    BrokenPromise,
    #[error("generator exhausted")]
    Exhausted,
    /// A spawned computation panicked.
    #[error("resumable computation panicked: {0}")]
    Panicked(Panic),
    #[error("{0}")]
    Failed(Failure),
}

impl Error {
    /// Wraps a user failure.
    pub fn failed(err: impl Into<Failure>) -> Self {
        Error::Failed(err.into())
    }

    /// Builds a [`Error::Panicked`] out of a payload caught by
    /// [`std::panic::catch_unwind`].
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Error::Panicked(Panic::new(payload))
    }
}

/// A panic caught at the boundary of a spawned computation.
///
/// The original payload is kept, so it can be downcast or re-raised with
/// [`resume`](Panic::resume).
pub struct Panic {
    message: String,
    payload: Mutex<Box<dyn Any + Send>>,
}

impl Panic {
    fn new(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_owned()
        };
        Panic {
            message,
            payload: Mutex::new(payload),
        }
    }

    /// The panic message, when the payload was a string.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_payload(self) -> Box<dyn Any + Send> {
        self.payload
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Continues unwinding with the original payload.
    pub fn resume(self) -> ! {
        panic::resume_unwind(self.into_payload())
    }
}

impl fmt::Debug for Panic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Panic").field(&self.message).finish()
    }
}

impl fmt::Display for Panic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn test_failed_keeps_original_error() {
        let err = Error::failed(std::io::Error::new(std::io::ErrorKind::Other, "💥"));
        match err {
            Error::Failed(inner) => {
                let io = inner.downcast_ref::<std::io::Error>().unwrap();
                assert_eq!(io.to_string(), "💥");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_panic_message_extracted() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert!(matches!(Error::from_panic(payload), Error::Panicked(p) if p.message() == "boom 1"));
        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        let err = Error::from_panic(payload);
        assert_eq!(err.to_string(), "resumable computation panicked: static");
    }

    #[derive(Debug, PartialEq)]
    struct Code(u32);

    #[test]
    fn test_panic_payload_kept() {
        let payload = panic::catch_unwind(|| panic::panic_any(Code(7))).unwrap_err();
        let Error::Panicked(caught) = Error::from_panic(payload) else {
            panic!("expected a panic error");
        };
        assert_eq!(caught.message(), "Box<dyn Any>");
        let resumed = panic::catch_unwind(AssertUnwindSafe(|| caught.resume())).unwrap_err();
        assert_eq!(resumed.downcast_ref::<Code>(), Some(&Code(7)));
    }
}
