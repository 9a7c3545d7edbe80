use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use crate::state::{register, register_err, Inner, OnReject, State};
use crate::Error;

/// What a success continuation hands back to the chain.
pub enum Step<T, E> {
    /// A plain value; the next queued continuation sees it.
    Value(T),
    /// A delegate promise; the current promise adopts its eventual outcome.
    Chain(Promise<T, E>),
}

/// The consumer side of a [`defer`](crate::defer) pair: a value container
/// with a temporal status.
///
/// A `Promise` is a cheap handle over shared state; clones observe the same
/// settlement. Continuations registered with [`then`](Promise::then) and
/// [`catch`](Promise::catch) run synchronously on whichever stack settles
/// the promise. A `Promise` can also be `.await`ed — but note that awaiting
/// moves a resolved value out of the shared state for every handle: once
/// one awaiter takes it, other clones that `.await` or `then` the same
/// promise see it as waiting again. Rejections stay observable by clone.
///
/// # Examples
///
/// ```
/// use defer_out::{defer, Step};
///
/// let completer = defer::<i32, String>();
/// let promise = completer.promise();
/// promise.then(|v| Ok(Step::Value(v + 1))).unwrap();
/// completer.resolve(41).unwrap();
/// assert!(promise.is_resolved());
/// ```
pub struct Promise<T, E> {
    pub(crate) inner: Arc<Mutex<Inner<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Promise {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Registers a success continuation.
    ///
    /// On a waiting promise the continuation queues and runs when the
    /// completer resolves. On a promise that is already resolved with
    /// nothing queued ahead, it runs before `then` returns, and its result
    /// overwrites the carried value (or, for [`Step::Chain`], suspends the
    /// promise on the delegate).
    ///
    /// Returns a handle to this same promise for chaining. `Err` means the
    /// continuation ran immediately, failed, and no error continuation was
    /// queued to receive the failure.
    pub fn then<F>(&self, on_resolve: F) -> Result<Promise<T, E>, Error<E>>
    where
        F: FnOnce(T) -> Result<Step<T, E>, E> + Send + 'static,
    {
        register(&self.inner, Box::new(on_resolve), None)
            .map(|_| self.clone())
            .map_err(Error::Unhandled)
    }

    /// Like [`then`](Promise::then), but also registers an error
    /// continuation alongside the success continuation.
    ///
    /// The error continuation only takes effect on the queued path; an
    /// immediately-dispatched success continuation that fails still reports
    /// through the return value unless an earlier `catch` is queued.
    pub fn then_catch<F, G>(&self, on_resolve: F, on_reject: G) -> Result<Promise<T, E>, Error<E>>
    where
        F: FnOnce(T) -> Result<Step<T, E>, E> + Send + 'static,
        G: FnOnce(E) + Send + 'static,
    {
        let on_reject: OnReject<E> = Box::new(move |error| {
            on_reject(error);
            Ok(())
        });
        register(&self.inner, Box::new(on_resolve), Some(on_reject))
            .map(|_| self.clone())
            .map_err(Error::Unhandled)
    }

    /// Registers an error continuation.
    ///
    /// Fires immediately when the promise is already rejected and no other
    /// error continuation is queued ahead; otherwise it queues. A trailing
    /// `catch` on a `then` chain intercepts both explicit rejections and
    /// failures inside success continuations.
    pub fn catch<G>(&self, on_reject: G) -> Promise<T, E>
    where
        G: FnOnce(E) + Send + 'static,
    {
        let handler: OnReject<E> = Box::new(move |error| {
            on_reject(error);
            Ok(())
        });
        // The wrapped handler is infallible, so registration cannot fail.
        let _ = register_err(&self.inner, handler);
        self.clone()
    }
}

impl<T, E> Promise<T, E> {
    pub fn is_waiting(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, State::Waiting)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, State::Resolved(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, State::Rejected(_))
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.lock().unwrap();
        f.debug_struct("Promise")
            .field("status", &st.state.name())
            .field("queued", &st.on_resolve.len())
            .field("catchers", &st.on_reject.len())
            .finish()
    }
}

impl<T, E> Future for Promise<T, E>
where
    E: Clone,
{
    type Output = Result<T, Error<E>>;

    /// The first poll that observes a resolved state takes the value, and
    /// it takes it from all handles: clones of this promise subsequently
    /// see the waiting state. Rejections are reported by clone and stay
    /// observable.
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut st = self.inner.lock().unwrap();
        match std::mem::replace(&mut st.state, State::Waiting) {
            State::Resolved(value) => Poll::Ready(Ok(value)),
            State::Rejected(error) => {
                st.state = State::Rejected(error.clone());
                Poll::Ready(Err(Error::Rejected(error)))
            }
            State::Waiting if st.completer_gone => Poll::Ready(Err(Error::CompleterDropped)),
            State::Waiting => {
                st.wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use futures::executor::block_on;

    use super::Step;
    use crate::{defer, Error};

    #[test]
    fn then_on_waiting_promise_defers_the_continuation() {
        let completer = defer::<i32, String>();
        let promise = completer.promise();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        promise
            .then(move |v| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(Step::Value(v))
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        completer.resolve(7).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(block_on(promise), Ok(7));
    }

    #[test]
    fn continuations_drain_in_registration_order() {
        let completer = defer::<i32, String>();
        let promise = completer.promise();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::clone(&log);
        let b = Arc::clone(&log);
        let c = Arc::clone(&log);
        promise
            .then(move |v| {
                a.lock().unwrap().push(v);
                Ok(Step::Value(v * 2))
            })
            .unwrap()
            .then(move |v| {
                b.lock().unwrap().push(v);
                Ok(Step::Value(v * 2))
            })
            .unwrap()
            .then(move |v| {
                c.lock().unwrap().push(v);
                Ok(Step::Value(v * 2))
            })
            .unwrap();
        completer.resolve(1).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 4]);
        assert_eq!(block_on(promise), Ok(8));
    }

    #[test]
    fn late_then_on_resolved_promise_dispatches_immediately() {
        let completer = defer::<i32, String>();
        let promise = completer.promise();
        completer.resolve(5).unwrap();
        promise.then(|v| Ok(Step::Value(v * 2))).unwrap();
        assert!(promise.is_resolved());
        assert_eq!(block_on(promise), Ok(10));
    }

    #[test]
    fn delegate_suspends_the_outer_chain_until_it_settles() {
        let outer = defer::<&'static str, String>();
        let nested = defer::<&'static str, String>();
        let promise = outer.promise();
        let delegate = nested.promise();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&log);
        promise
            .then(move |v| {
                first.lock().unwrap().push(v);
                Ok(Step::Chain(delegate))
            })
            .unwrap();
        let second = Arc::clone(&log);
        promise
            .then(move |v| {
                second.lock().unwrap().push(v);
                Ok(Step::Value(v))
            })
            .unwrap();
        outer.resolve("first").unwrap();
        assert!(promise.is_waiting());
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
        nested.resolve("second").unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert!(promise.is_resolved());
    }

    #[test]
    fn delegate_rejection_reaches_the_outer_catch() {
        let outer = defer::<i32, String>();
        let nested = defer::<i32, String>();
        let promise = outer.promise();
        let delegate = nested.promise();
        promise.then(move |_| Ok(Step::Chain(delegate))).unwrap();
        let caught = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&caught);
        promise.catch(move |e| {
            *sink.lock().unwrap() = Some(e);
        });
        outer.resolve(1).unwrap();
        nested.reject("boom".into()).unwrap();
        assert_eq!(caught.lock().unwrap().as_deref(), Some("boom"));
        assert!(promise.is_rejected());
    }

    #[test]
    fn reject_services_exactly_one_queued_handler() {
        let completer = defer::<i32, String>();
        let promise = completer.promise();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let hit = Arc::clone(&first);
        promise.catch(move |_| {
            hit.fetch_add(1, Ordering::SeqCst);
        });
        let hit = Arc::clone(&second);
        promise.catch(move |_| {
            hit.fetch_add(1, Ordering::SeqCst);
        });
        completer.reject("boom".into()).unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn catch_on_rejected_promise_fires_immediately() {
        let completer = defer::<i32, String>();
        let promise = completer.promise();
        assert!(completer.reject("boom".into()).is_err());
        let caught = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&caught);
        promise.catch(move |e| {
            *sink.lock().unwrap() = Some(e);
        });
        assert_eq!(caught.lock().unwrap().as_deref(), Some("boom"));
    }

    #[test]
    fn failed_continuation_is_redirected_to_the_queued_catch() {
        let completer = defer::<i32, String>();
        let promise = completer.promise();
        promise.then(|_| Err("broke in handler".to_string())).unwrap();
        let caught = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&caught);
        promise.catch(move |e| {
            *sink.lock().unwrap() = Some(e);
        });
        completer.resolve(1).unwrap();
        assert_eq!(caught.lock().unwrap().as_deref(), Some("broke in handler"));
        assert!(promise.is_rejected());
    }

    #[test]
    fn failed_continuation_without_catch_surfaces_at_the_resolve_call_site() {
        let completer = defer::<i32, String>();
        let promise = completer.promise();
        promise.then(|_| Err("broke".to_string())).unwrap();
        assert_eq!(
            completer.resolve(1).unwrap_err(),
            Error::Unhandled("broke".into())
        );
        assert!(promise.is_rejected());
    }

    #[test]
    fn immediate_then_failure_surfaces_at_the_then_call_site() {
        let completer = defer::<i32, String>();
        let promise = completer.promise();
        completer.resolve(1).unwrap();
        let err = promise.then(|_| Err("broke".to_string())).unwrap_err();
        assert_eq!(err, Error::Unhandled("broke".into()));
    }

    #[test]
    fn immediate_then_catch_failure_skips_the_paired_error_continuation() {
        let completer = defer::<i32, String>();
        let promise = completer.promise();
        completer.resolve(1).unwrap();
        let called = Arc::new(AtomicUsize::new(0));
        let hit = Arc::clone(&called);
        let err = promise
            .then_catch(
                |_| Err("broke".to_string()),
                move |_| {
                    hit.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap_err();
        assert_eq!(err, Error::Unhandled("broke".into()));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn adopting_an_already_resolved_delegate_resolves_immediately() {
        let outer = defer::<i32, String>();
        let nested = defer::<i32, String>();
        let promise = outer.promise();
        let delegate = nested.promise();
        nested.resolve(9).unwrap();
        promise.then(move |_| Ok(Step::Chain(delegate))).unwrap();
        outer.resolve(1).unwrap();
        assert!(promise.is_resolved());
        assert_eq!(block_on(promise), Ok(9));
    }

    #[test]
    fn adopting_an_already_rejected_delegate_routes_the_error_to_catch() {
        let outer = defer::<i32, String>();
        let nested = defer::<i32, String>();
        let promise = outer.promise();
        let delegate = nested.promise();
        assert!(nested.reject("early boom".into()).is_err());
        promise.then(move |_| Ok(Step::Chain(delegate))).unwrap();
        let caught = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&caught);
        promise.catch(move |e| {
            *sink.lock().unwrap() = Some(e);
        });
        outer.resolve(1).unwrap();
        assert_eq!(caught.lock().unwrap().as_deref(), Some("early boom"));
        assert!(promise.is_rejected());
    }

    #[test]
    fn then_catch_registers_both_continuations() {
        let completer = defer::<i32, String>();
        let promise = completer.promise();
        let caught = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&caught);
        promise
            .then_catch(
                |v| Ok(Step::Value(v)),
                move |e| {
                    *sink.lock().unwrap() = Some(e);
                },
            )
            .unwrap();
        completer.reject("boom".into()).unwrap();
        assert_eq!(caught.lock().unwrap().as_deref(), Some("boom"));
    }
}
