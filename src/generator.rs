//! Lazy, pull-based sequences built on [`Resumable`].
use crate::{Builder, Error, Resumable};
use std::fmt;
use std::iter::FusedIterator;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handed to a generator's producer; each [`yield_value`](Yielder::yield_value)
/// delivers one element and suspends the producer until the next pull.
pub struct Yielder<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Yielder<T> {
    pub fn yield_value(&self, value: T) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
        crate::resumable::suspend();
    }
}

impl<T> Clone for Yielder<T> {
    fn clone(&self) -> Self {
        Yielder {
            slot: Arc::clone(&self.slot),
        }
    }
}

struct Inner<T> {
    resumable: Mutex<Resumable<()>>,
    slot: Arc<Mutex<Option<T>>>,
    /// Id of the producer's computation.
    producer: u64,
}

/// A single-pass sequence produced by a closure.
///
/// Cloning the handle shares the same underlying sequence. Once the
/// producer returns, the generator is exhausted: [`Iterator::next`] yields
/// `None` and [`next_value`](Generator::next_value) fails with
/// [`Error::Exhausted`].
///
/// # Examples
///
/// ```
/// use promise_await::{Error, Generator};
///
/// let fib = Generator::new(|co| {
///     let (mut a, mut b) = (0u64, 1u64);
///     for _ in 0..10 {
///         co.yield_value(a);
///         (a, b) = (b, a + b);
///     }
/// });
/// for expected in [0, 1, 1, 2, 3, 5, 8, 13, 21, 34] {
///     assert_eq!(fib.next_value().unwrap(), expected);
/// }
/// assert!(matches!(fib.next_value(), Err(Error::Exhausted)));
/// ```
pub struct Generator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Generator<T>
where
    T: Send + 'static,
{
    /// Wraps `producer`, which runs lazily, one element per pull, on the
    /// pulling thread.
    pub fn new<G>(producer: G) -> Self
    where
        G: FnOnce(Yielder<T>) + Send + 'static,
    {
        Self::with_builder(&Builder::new(), producer)
    }

    pub(crate) fn with_builder<G>(builder: &Builder, producer: G) -> Self
    where
        G: FnOnce(Yielder<T>) + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(None));
        let yielder = Yielder {
            slot: Arc::clone(&slot),
        };
        let resumable = builder.create_paused(move || producer(yielder));
        let producer = resumable.id();
        Generator {
            inner: Arc::new(Inner {
                resumable: Mutex::new(resumable),
                slot,
                producer,
            }),
        }
    }
}

impl<T> Generator<T> {
    /// Pulls the next element.
    ///
    /// # Panics
    ///
    /// Panics when called from inside this generator's own producer, and
    /// resumes the producer's panic if it panicked.
    pub fn next_value(&self) -> Result<T, Error> {
        if crate::resumable::current_id() == Some(self.inner.producer) {
            panic!("generator pulled from inside its own producer");
        }
        let mut resumable = self.lock_resumable();
        loop {
            if resumable.ready() {
                return Err(Error::Exhausted);
            }
            resumable.resume();
            if resumable.ready() {
                resumable.result();
                return Err(Error::Exhausted);
            }
            if let Some(value) = self.take_slot() {
                return Ok(value);
            }
        }
    }

    fn lock_resumable(&self) -> MutexGuard<'_, Resumable<()>> {
        self.inner
            .resumable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn take_slot(&self) -> Option<T> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_exhausted(&self) -> bool {
        self.lock_resumable().ready()
    }
}

impl<T> Clone for Generator<T> {
    fn clone(&self) -> Self {
        Generator {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Iterator for Generator<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.next_value().ok()
    }
}

impl<T> FusedIterator for Generator<T> {}

impl<T> fmt::Debug for Generator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}
