//! Worker / dispatcher thread pair
//!
//! Requests are posted over an unbounded channel to the worker thread, which
//! runs the [`Handler`] and pushes one [`Outcome`] per request onto the reply
//! channel. The dispatcher thread drains that channel into the owner's sink.
//! A panic inside the handler is caught and surfaces as [`Outcome::Fault`];
//! the worker then carries on with the next request.

use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Result, TranscodeError};

/// Request processor living on the worker thread.
pub(crate) trait Handler: Send + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    fn handle(&mut self, request: Self::Request) -> Self::Response;
}

/// What the dispatcher receives for each request, in request order.
#[derive(Debug)]
pub(crate) enum Outcome<R> {
    Reply(R),
    /// The context failed while serving a request; carries no correlation
    /// to the request that caused it.
    Fault(String),
}

pub(crate) struct ExecutionContext<Req> {
    id: Uuid,
    name: &'static str,
    tx: Mutex<Option<mpsc::UnboundedSender<Req>>>,
    terminated: Arc<AtomicBool>,
}

impl<Req: Send + 'static> ExecutionContext<Req> {
    /// Start the worker and dispatcher threads.
    ///
    /// `sink` runs on the dispatcher thread for every outcome until the
    /// context is terminated.
    pub(crate) fn spawn<H, S>(name: &'static str, mut handler: H, mut sink: S) -> Result<Self>
    where
        H: Handler<Request = Req>,
        S: FnMut(Outcome<H::Response>) + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel::<Req>();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outcome<H::Response>>();
        let terminated = Arc::new(AtomicBool::new(false));

        let flag = terminated.clone();
        thread::Builder::new()
            .name(format!("{}-worker", name))
            .spawn(move || {
                tracing::debug!(%id, context = name, "execution context started");
                while let Some(request) = rx.blocking_recv() {
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    let outcome =
                        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request))) {
                            Ok(response) => Outcome::Reply(response),
                            Err(payload) => {
                                let message = panic_message(payload.as_ref());
                                tracing::warn!(%id, context = name, %message, "request handler panicked");
                                Outcome::Fault(message)
                            }
                        };
                    if out_tx.send(outcome).is_err() {
                        break;
                    }
                }
                tracing::debug!(%id, context = name, "execution context stopped");
            })
            .map_err(|e| {
                TranscodeError::Transport(format!("failed to spawn {} worker: {}", name, e))
            })?;

        let flag = terminated.clone();
        thread::Builder::new()
            .name(format!("{}-dispatch", name))
            .spawn(move || {
                while let Some(outcome) = out_rx.blocking_recv() {
                    if flag.load(Ordering::Acquire) {
                        tracing::trace!(%id, context = name, "dropping reply after termination");
                        break;
                    }
                    if panic::catch_unwind(AssertUnwindSafe(|| sink(outcome))).is_err() {
                        tracing::warn!(%id, context = name, "reply sink panicked");
                    }
                }
            })
            .map_err(|e| {
                TranscodeError::Transport(format!("failed to spawn {} dispatcher: {}", name, e))
            })?;

        Ok(Self {
            id,
            name,
            tx: Mutex::new(Some(tx)),
            terminated,
        })
    }

    /// Hand a request over to the worker thread.
    pub(crate) fn post(&self, request: Req) -> Result<()> {
        let tx = self.tx.lock();
        match tx.as_ref() {
            Some(tx) if !self.is_terminated() => {
                tx.send(request).map_err(|_| TranscodeError::Terminated)
            }
            _ => Err(TranscodeError::Terminated),
        }
    }

    /// Destroy the context. The request in progress (if any) runs to
    /// completion but its reply is discarded; queued requests never run.
    pub(crate) fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.tx.lock().take();
        tracing::debug!(id = %self.id, context = self.name, "execution context terminated");
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }
}

impl<Req> Drop for ExecutionContext<Req> {
    fn drop(&mut self) {
        self.terminated.store(true, Ordering::Release);
        self.tx.lock().take();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "execution context panicked".to_string()
    }
}
