//! Adapter for legacy completion-callback functions.

use crate::{defer, Error, Promise};

/// The synthesized completion callback handed to a promisified function.
///
/// The `Result` argument is the closed-sum rendition of the error-first
/// `(err, data)` pair: `Err` rejects the promise, `Ok` resolves it. The
/// return value reports an unhandled rejection back to whoever invoked the
/// callback.
pub type Done<T, E> = Box<dyn FnOnce(Result<T, E>) -> Result<(), Error<E>> + Send>;

/// Adapts `func`, a fixed-arity function taking a completion callback as
/// its final argument, into a closure that returns a [`Promise`].
///
/// `arity` counts the wrapped function's parameters including the trailing
/// callback, captured at wrap time. Each call truncates extra arguments and
/// pads missing ones with `None` to exactly `arity - 1` positions, invokes
/// `func` synchronously, and returns the pending promise immediately; the
/// promise settles whenever `func` (or whoever it handed the callback to)
/// completes it.
///
/// # Examples
///
/// ```
/// use defer_out::{promisify, Done};
/// use futures::executor::block_on;
///
/// let mut double = promisify::<i32, i32, String, _>(2, |args, done: Done<i32, String>| {
///     let n = args[0].unwrap_or(0);
///     done(Ok(n * 2)).unwrap();
/// });
/// assert_eq!(block_on(double(vec![21])), Ok(42));
/// ```
pub fn promisify<A, T, E, F>(arity: usize, mut func: F) -> impl FnMut(Vec<A>) -> Promise<T, E>
where
    F: FnMut(Vec<Option<A>>, Done<T, E>),
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    move |args: Vec<A>| {
        let completer = defer::<T, E>();
        let promise = completer.promise();
        let positional = arity.saturating_sub(1);
        let mut padded: Vec<Option<A>> = args.into_iter().take(positional).map(Some).collect();
        padded.resize_with(positional, || None);
        let done: Done<T, E> = Box::new(move |outcome| match outcome {
            Ok(value) => completer.resolve(value),
            Err(error) => completer.reject(error),
        });
        func(padded, done);
        promise
    }
}
