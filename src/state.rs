//! Shared promise state and the settlement protocol.
//!
//! Everything here runs on the caller's stack: whoever settles a promise
//! pays for draining its continuation queue. The mutex is never held while a
//! user continuation runs, so continuations are free to register further
//! work on the promise they were dispatched from.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::task::Waker;

use log::trace;

use crate::promise::{Promise, Step};

/// A success continuation consumes the value and either produces the next
/// value in the chain, hands back a delegate promise to adopt, or fails.
pub(crate) type OnResolve<T, E> = Box<dyn FnOnce(T) -> Result<Step<T, E>, E> + Send>;

/// An error continuation consumes the error; an `Err` return propagates the
/// failure to whoever ran the rejection protocol.
pub(crate) type OnReject<E> = Box<dyn FnOnce(E) -> Result<(), E> + Send>;

/// Status and payload in one closed type. A carried value can never be
/// mistaken for a status marker because the payload lives inside the
/// variant.
pub(crate) enum State<T, E> {
    Waiting,
    Resolved(T),
    Rejected(E),
}

impl<T, E> State<T, E> {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            State::Waiting => "waiting",
            State::Resolved(_) => "resolved",
            State::Rejected(_) => "rejected",
        }
    }
}

pub(crate) struct Inner<T, E> {
    pub(crate) state: State<T, E>,
    pub(crate) on_resolve: VecDeque<OnResolve<T, E>>,
    pub(crate) on_reject: VecDeque<OnReject<E>>,
    pub(crate) wakers: Vec<Waker>,
    pub(crate) completer_gone: bool,
}

impl<T, E> Inner<T, E> {
    pub(crate) fn new() -> Self {
        Inner {
            state: State::Waiting,
            on_resolve: VecDeque::new(),
            on_reject: VecDeque::new(),
            wakers: Vec::new(),
            completer_gone: false,
        }
    }
}

/// Stores a terminal state and wakes every waiting consumer.
fn settle<T, E>(inner: &Arc<Mutex<Inner<T, E>>>, state: State<T, E>) {
    let wakers = {
        let mut st = inner.lock().unwrap();
        trace!("promise settled as {}", state.name());
        st.state = state;
        std::mem::take(&mut st.wakers)
    };
    for waker in wakers {
        waker.wake();
    }
}

/// The resolution protocol: an iterative drain of the success queue.
///
/// Each dequeued continuation sees the value produced by the previous one.
/// While a continuation runs the state is parked at `Waiting` (the value is
/// on loan to it), so reentrant registrations queue instead of racing the
/// moved value. A continuation returning a delegate promise leaves the
/// promise suspended until the delegate settles; a failing continuation
/// switches to the rejection protocol.
pub(crate) fn complete_ok<T, E>(inner: &Arc<Mutex<Inner<T, E>>>, mut value: T) -> Result<(), E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    loop {
        let next = {
            let mut st = inner.lock().unwrap();
            match st.on_resolve.pop_front() {
                Some(next) => {
                    st.state = State::Waiting;
                    Some(next)
                }
                None => None,
            }
        };
        match next {
            None => {
                settle(inner, State::Resolved(value));
                return Ok(());
            }
            Some(next) => match next(value) {
                Ok(Step::Value(produced)) => value = produced,
                Ok(Step::Chain(delegate)) => {
                    trace!("continuation produced a delegate, adopting its outcome");
                    return adopt(Arc::clone(inner), &delegate);
                }
                Err(error) => return complete_err(inner, error),
            },
        }
    }
}

/// The rejection protocol: the state becomes `Rejected` and the FIRST queued
/// error continuation, if any, receives the error. One handler per
/// rejection event; the queue is not drained further. With no handler
/// queued the error goes back to the caller.
pub(crate) fn complete_err<T, E>(inner: &Arc<Mutex<Inner<T, E>>>, error: E) -> Result<(), E>
where
    E: Clone,
{
    let (handler, wakers) = {
        let mut st = inner.lock().unwrap();
        let handler = st.on_reject.pop_front();
        st.state = State::Rejected(error.clone());
        (handler, std::mem::take(&mut st.wakers))
    };
    for waker in wakers {
        waker.wake();
    }
    match handler {
        Some(handler) => {
            trace!("rejection delivered to one queued handler");
            handler(error)
        }
        None => {
            trace!("rejection had no queued handler, surfacing to the caller");
            Err(error)
        }
    }
}

/// Registers a success continuation (and optionally an error continuation)
/// on a promise.
///
/// When the promise is already resolved and nothing is queued ahead, the
/// continuation dispatches immediately by feeding the parked value back
/// through the resolution protocol. On that path the optional error
/// continuation is not registered; only the queued path records it.
pub(crate) fn register<T, E>(
    inner: &Arc<Mutex<Inner<T, E>>>,
    on_ok: OnResolve<T, E>,
    on_err: Option<OnReject<E>>,
) -> Result<(), E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let resume = {
        let mut st = inner.lock().unwrap();
        let immediate = matches!(st.state, State::Resolved(_)) && st.on_resolve.is_empty();
        st.on_resolve.push_back(on_ok);
        if immediate {
            match std::mem::replace(&mut st.state, State::Waiting) {
                State::Resolved(value) => Some(value),
                other => {
                    st.state = other;
                    None
                }
            }
        } else {
            if let Some(on_err) = on_err {
                st.on_reject.push_back(on_err);
            }
            None
        }
    };
    match resume {
        Some(value) => complete_ok(inner, value),
        None => Ok(()),
    }
}

/// Registers an error continuation, firing it immediately when the promise
/// is already rejected with nothing queued ahead of it.
pub(crate) fn register_err<T, E>(inner: &Arc<Mutex<Inner<T, E>>>, on_err: OnReject<E>) -> Result<(), E>
where
    E: Clone,
{
    let fire = {
        let mut st = inner.lock().unwrap();
        match &st.state {
            State::Rejected(error) if st.on_reject.is_empty() => Some((error.clone(), on_err)),
            _ => {
                st.on_reject.push_back(on_err);
                None
            }
        }
    };
    match fire {
        Some((error, on_err)) => on_err(error),
        None => Ok(()),
    }
}

/// Makes `outer` adopt the eventual outcome of `delegate`: the delegate's
/// value re-enters the outer resolution protocol (continuing the drain of
/// whatever is still queued there), and the delegate's error runs the outer
/// rejection protocol. Chained delegation composes because the adopted
/// outcome may itself be a delegate.
pub(crate) fn adopt<T, E>(outer: Arc<Mutex<Inner<T, E>>>, delegate: &Promise<T, E>) -> Result<(), E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let reject_side = Arc::clone(&outer);
    let on_ok: OnResolve<T, E> = Box::new(move |value: T| {
        complete_ok(&outer, value.clone())?;
        Ok(Step::Value(value))
    });
    let on_err: OnReject<E> = Box::new(move |error: E| complete_err(&reject_side, error));
    register(&delegate.inner, on_ok, None)?;
    register_err(&delegate.inner, on_err)
}
