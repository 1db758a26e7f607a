// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The four mutually-exclusive handler shapes from spec.md §4.5 collapse, per
// §9's design note, to one internal abstraction: a function of
// `(msg_id, bytes)` that eventually produces an optional response or fails.
// `Responder` is that single registration point's completion half — sync
// shapes call it inline, async shapes spawn a worker and call it later.
// `RpcChannel` supplies the closure a `Responder` runs on completion, so
// this module never needs to know about rings, correlation tables, or shm.

use std::sync::Arc;

/// What a `request-with-result` handler returns: the response payload, or
/// any error, which the dispatcher turns into an outbound `ERROR` packet.
pub type HandlerResult = Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;

/// A one-shot completion handle passed to the registered handler for one
/// inbound request. Exactly one of `respond`/`fail` must be called; if the
/// handler drops this without calling either (a bug, or a panic caught
/// upstream), the drop impl emits an `ERROR` so the remote caller's
/// wait-slot is never left hanging (spec.md §4.5 step 3: "a response is
/// always emitted for every inbound request").
pub struct Responder {
    msg_id: u64,
    done: Option<Box<dyn FnOnce(bool, Option<Vec<u8>>) + Send>>,
}

impl Responder {
    pub(crate) fn new(msg_id: u64, done: Box<dyn FnOnce(bool, Option<Vec<u8>>) + Send>) -> Self {
        Self {
            msg_id,
            done: Some(done),
        }
    }

    /// The `msg_id` of the request being answered.
    pub fn msg_id(&self) -> u64 {
        self.msg_id
    }

    /// Emit a successful `RESPONSE`. `data` is empty for the response-less
    /// handler shapes.
    pub fn respond(mut self, data: Option<Vec<u8>>) {
        if let Some(done) = self.done.take() {
            done(true, data);
        }
    }

    /// Emit an `ERROR` in place of a response.
    pub fn fail(mut self) {
        if let Some(done) = self.done.take() {
            done(false, None);
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            done(false, None);
        }
    }
}

/// A registered inbound-request handler, normalised to one shape regardless
/// of which constructor built it.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<dyn Fn(u64, Vec<u8>, Responder) + Send + Sync>,
}

impl Handler {
    /// Synchronous, no response payload: the handler runs on the dispatch
    /// worker thread and an empty `RESPONSE` is sent as soon as it returns.
    pub fn request_only<F>(f: F) -> Self
    where
        F: Fn(u64, &[u8]) + Send + Sync + 'static,
    {
        Handler {
            inner: Arc::new(move |id, data, responder| {
                f(id, &data);
                responder.respond(None);
            }),
        }
    }

    /// Synchronous, returns response bytes: `Ok` becomes `RESPONSE`, `Err`
    /// becomes `ERROR`.
    pub fn request_with_result<F>(f: F) -> Self
    where
        F: Fn(u64, &[u8]) -> HandlerResult + Send + Sync + 'static,
    {
        Handler {
            inner: Arc::new(move |id, data, responder| match f(id, &data) {
                Ok(bytes) => responder.respond(Some(bytes)),
                Err(_) => responder.fail(),
            }),
        }
    }

    /// Asynchronous, no response payload: `f` runs on its own worker thread;
    /// the empty `RESPONSE` is sent once that thread returns.
    pub fn request_only_async<F>(f: F) -> Self
    where
        F: Fn(u64, Vec<u8>) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Handler {
            inner: Arc::new(move |id, data, responder| {
                let f = Arc::clone(&f);
                std::thread::spawn(move || {
                    f(id, data);
                    responder.respond(None);
                });
            }),
        }
    }

    /// Asynchronous, resolves to response bytes: `f` runs on its own worker
    /// thread; its result becomes a `RESPONSE` or an `ERROR`.
    pub fn request_with_result_async<F>(f: F) -> Self
    where
        F: Fn(u64, Vec<u8>) -> HandlerResult + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Handler {
            inner: Arc::new(move |id, data, responder| {
                let f = Arc::clone(&f);
                std::thread::spawn(move || match f(id, data) {
                    Ok(bytes) => responder.respond(Some(bytes)),
                    Err(_) => responder.fail(),
                });
            }),
        }
    }

    pub(crate) fn invoke(&self, msg_id: u64, data: Vec<u8>, responder: Responder) {
        (self.inner)(msg_id, data, responder);
    }
}
