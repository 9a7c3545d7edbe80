//! A synchronous promise/completer pair with callback chaining.
//!
//! [`defer`] gives the producer a [`Completer`] and consumers as many
//! [`Promise`] handles as they like. Consumers chain continuations with
//! [`Promise::then`] and [`Promise::catch`]; the producer settles the pair
//! with [`Completer::resolve`] or [`Completer::reject`], which drains the
//! queued continuations right there on the caller's stack. A continuation
//! may itself hand back another promise ([`Step::Chain`]), making the
//! original promise adopt that promise's eventual outcome. [`promisify`]
//! adapts a legacy completion-callback function into one returning a
//! [`Promise`].
//!
//! There is no scheduler: a promise can be `.await`ed, but continuation
//! dispatch always happens synchronously inside whichever call settles the
//! promise. Uncaught rejections are loud; they come back as
//! [`Error::Unhandled`] from the call that triggered them.
//!
//! # Examples
//!
//! ```
//! use defer_out::{defer, Step};
//! use futures::executor::block_on;
//!
//! let completer = defer::<i32, String>();
//! let promise = completer.promise();
//! promise.then(|v| Ok(Step::Value(v + 1))).unwrap();
//! completer.resolve(41).unwrap();
//! assert_eq!(block_on(promise), Ok(42));
//! ```
//!
//! Delegation suspends the outer chain until the nested promise settles:
//!
//! ```
//! use defer_out::{defer, Step};
//!
//! let outer = defer::<String, String>();
//! let nested = defer::<String, String>();
//! let promise = outer.promise();
//! let delegate = nested.promise();
//! promise.then(move |_| Ok(Step::Chain(delegate))).unwrap();
//! outer.resolve("first".into()).unwrap();
//! assert!(promise.is_waiting());
//! nested.resolve("second".into()).unwrap();
//! assert!(promise.is_resolved());
//! ```

use thiserror::Error;

mod completer;
mod promise;
mod promisify;
mod state;

pub use completer::{defer, Completer};
pub use promise::{Promise, Step};
pub use promisify::{promisify, Done};

/// Everything that can go wrong with a promise.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error<E> {
    /// The completer was dropped before settling the promise.
    #[error("completer dropped before settling the promise")]
    CompleterDropped,
    /// The promise was rejected; reported to `.await`ing consumers.
    #[error("promise was rejected")]
    Rejected(E),
    /// A rejection (explicit, or a failed continuation) found no error
    /// continuation queued to receive it and surfaced at the call site
    /// that triggered it.
    #[error("no handler was queued to receive the rejection")]
    Unhandled(E),
}
