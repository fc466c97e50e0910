//! The per-request context and the chain executor.
//!
//! # Execution model
//!
//! A matched route resolves to one chain:
//!
//! ```text
//! [global mw…, outer group mw…, inner group mw…, route mw…, handler]
//! ```
//!
//! The adapter calls [`Context::next`] once to enter the chain. Each element
//! decides whether to call `next()` to run the remainder, and sees the
//! remainder's `Result` when it returns (the onion model):
//!
//! ```text
//! m1 ──next()──▶ m2 ──next()──▶ handler
//! m1 ◀──Err(e)── m2 ◀──Err(e)── handler      m2 may recover (Ok) or map e
//! ```
//!
//! - An element that returns without calling `next()` stops the chain.
//! - The cursor only moves forward. A second `next()` from the same element
//!   is a no-op that returns `Ok(())`.
//! - [`abort`](Context::abort) only raises a flag; it never stops `next()`.
//! - A panic inside an element is caught at the `next()` boundary and
//!   surfaces as a `500` [`Error::Handler`] to the element that called it.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tracing::error;

use crate::body::RequestBody;
use crate::error::{Error, Result};
use crate::form::MultipartForm;
use crate::handler::BoxFuture;
use crate::request::RequestHead;
use crate::response::Response;
use crate::router::Chain;
use crate::state::StateStore;

/// One in-flight request: its inputs, its scratch state, and the response
/// being built.
///
/// A context is created by the serving adapter for exactly one request and
/// dropped once the response has been handed back to the backend. It is
/// never shared or reused.
pub struct Context {
    chain: Chain,
    /// Index of the next chain element to run.
    cursor: usize,
    /// Index of the element currently executing, `None` while the adapter
    /// itself is driving.
    current: Option<usize>,
    aborted: bool,
    state: StateStore,
    pub(crate) head: RequestHead,
    pub(crate) body: RequestBody,
    pub(crate) form: Option<MultipartForm>,
    pub(crate) response: Response,
    native: Option<Box<dyn Any + Send + Sync>>,
}

impl Context {
    pub(crate) fn new(chain: Chain, head: RequestHead, body: RequestBody) -> Self {
        Self {
            chain,
            cursor: 0,
            current: None,
            aborted: false,
            state: StateStore::new(),
            head,
            body,
            form: None,
            response: Response::default(),
            native: None,
        }
    }

    /// Runs the next element of the chain and returns its result.
    ///
    /// Returns `Ok(())` without doing anything once the chain is exhausted, or
    /// when the calling element has already advanced past itself.
    pub fn next(&mut self) -> BoxFuture<'_, Result<()>> {
        let Some(index) = self.advance() else {
            return Box::pin(async { Ok(()) });
        };
        let handler = std::sync::Arc::clone(&self.chain[index]);

        Box::pin(async move {
            let caller = self.current.replace(index);
            let outcome = AssertUnwindSafe(handler.handle(self)).catch_unwind().await;
            self.current = caller;

            outcome.unwrap_or_else(|payload| {
                let err = Error::from_panic(payload);
                error!(path = %self.path(), error = %err, "chain element panicked");
                Err(err)
            })
        })
    }

    fn advance(&mut self) -> Option<usize> {
        let expected = self.current.map_or(0, |index| index + 1);
        if self.cursor != expected || self.cursor >= self.chain.len() {
            return None;
        }
        self.cursor += 1;
        Some(expected)
    }

    /// Marks the request as aborted. Does not stop [`next`](Context::next).
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Stores a value visible to every later chain element of this request.
    pub fn set<V>(&mut self, key: impl Into<String>, value: V)
    where
        V: Any + Send + Sync,
    {
        self.state.set(key, value);
    }

    pub fn get<V: Any>(&self, key: &str) -> Option<&V> {
        self.state.get(key)
    }

    pub fn get_any(&self, key: &str) -> Option<&(dyn Any + Send + Sync)> {
        self.state.get_any(key)
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StateStore {
        &mut self.state
    }

    /// Backend-specific escape hatch.
    ///
    /// Each adapter attaches one native value (for example
    /// [`HyperNative`](crate::HyperNative)); ask for it by type. Code that
    /// relies on it is tied to that backend: the answer is `None` everywhere
    /// else.
    pub fn native<T: Any>(&self) -> Option<&T> {
        self.native.as_deref()?.downcast_ref()
    }

    pub(crate) fn set_native<T>(&mut self, native: T)
    where
        T: Any + Send + Sync,
    {
        self.native = Some(Box::new(native));
    }

    pub(crate) fn into_response(self) -> Response {
        self.response
    }
}
