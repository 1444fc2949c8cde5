//! Configuration of the execution context backing a resumable computation.
use crate::{Error, Failure, Future, Generator, Resumable, Yielder};

/// Stack size, in bytes, given to a computation when none is configured.
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

/// Configures the coroutine stack that resumable computations, spawned
/// computations and generators run on.
///
/// # Examples
///
/// ```
/// use promise_await::Builder;
///
/// let future = Builder::new()
///     .stack_size(256 * 1024)
///     .spawn(|| std::thread::current().id());
/// assert_eq!(future.get().unwrap(), std::thread::current().id());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Builder {
    stack_size: Option<usize>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack size in bytes for each computation.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    fn resolved_stack_size(&self) -> usize {
        self.stack_size.unwrap_or(DEFAULT_STACK_SIZE)
    }

    /// Creates a computation and runs it until it finishes or first
    /// suspends.
    pub fn create<F, R>(&self, body: F) -> Resumable<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let mut resumable = self.create_paused(body);
        resumable.resume();
        resumable
    }

    /// Creates a computation that starts on its first resume.
    pub fn create_paused<F, R>(&self, body: F) -> Resumable<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        Resumable::start(self.resolved_stack_size(), body)
    }

    /// Like [`spawn`](fn@crate::spawn) on a configured stack.
    pub fn spawn<F, R>(&self, body: F) -> Future<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        crate::spawn::spawn_with(self, move || Ok(body()))
    }

    /// Like [`try_spawn`](fn@crate::try_spawn) on a configured stack.
    pub fn try_spawn<F, R, E>(&self, body: F) -> Future<R>
    where
        F: FnOnce() -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<Failure>,
    {
        crate::spawn::spawn_with(self, move || body().map_err(|err| Error::Failed(err.into())))
    }

    /// Like [`Generator::new`] on a configured stack.
    pub fn generator<T, G>(&self, producer: G) -> Generator<T>
    where
        T: Send + 'static,
        G: FnOnce(Yielder<T>) + Send + 'static,
    {
        Generator::with_builder(self, producer)
    }
}
