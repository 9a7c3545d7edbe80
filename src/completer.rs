use std::sync::{Arc, Mutex};

use log::trace;

use crate::state::{complete_err, complete_ok, Inner, State};
use crate::{Error, Promise};

/// Constructs a fresh completer/promise pair in the waiting state.
///
/// This is the sole creation entry point for producers: keep the
/// [`Completer`], hand out the [`Promise`].
pub fn defer<T, E>() -> Completer<T, E> {
    Completer {
        inner: Arc::new(Mutex::new(Inner::new())),
        done: false,
    }
}

/// The producer side of a [`defer`] pair.
///
/// `resolve` and `reject` consume the completer, so a promise can only ever
/// be completed once; the type system rules out a second completion.
/// Consumers holding the [`Promise`] cannot complete it.
///
/// # Examples
///
/// ```
/// use defer_out::defer;
/// use futures::executor::block_on;
/// use std::thread;
///
/// let completer = defer::<String, String>();
/// let promise = completer.promise();
/// let waiter = thread::spawn(move || block_on(promise));
/// completer.resolve("ready".into()).unwrap();
/// assert_eq!(waiter.join().unwrap(), Ok("ready".into()));
/// ```
pub struct Completer<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
    done: bool,
}

impl<T, E> Completer<T, E> {
    /// Hands out a consumer handle to the owned promise.
    pub fn promise(&self) -> Promise<T, E> {
        Promise {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Completer<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Completes the promise with a value, draining every queued success
    /// continuation on this stack (see the ordering guarantees on
    /// [`Promise::then`]).
    ///
    /// `Err(Error::Unhandled)` means a continuation failed with no error
    /// continuation queued to receive the failure.
    pub fn resolve(mut self, value: T) -> Result<(), Error<E>> {
        self.done = true;
        complete_ok(&self.inner, value).map_err(Error::Unhandled)
    }

    /// Completes the promise with an error, delivering it to the first
    /// queued error continuation only.
    ///
    /// An uncaught rejection is loud: with no handler queued the error
    /// comes straight back as `Err(Error::Unhandled)` rather than being
    /// swallowed.
    pub fn reject(mut self, error: E) -> Result<(), Error<E>> {
        self.done = true;
        complete_err(&self.inner, error).map_err(Error::Unhandled)
    }
}

impl<T, E> Drop for Completer<T, E> {
    /// A completer dropped without completing marks the promise broken;
    /// waiting consumers wake with [`Error::CompleterDropped`].
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let wakers = {
            let mut st = self.inner.lock().unwrap();
            if matches!(st.state, State::Waiting) {
                trace!("completer dropped while its promise was still waiting");
                st.completer_gone = true;
                std::mem::take(&mut st.wakers)
            } else {
                Vec::new()
            }
        };
        for waker in wakers {
            waker.wake();
        }
    }
}
