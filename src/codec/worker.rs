//! Codec worker dispatch
//!
//! Every request is posted to the codec's execution context and a matching
//! continuation is appended to the pending queue in the same critical
//! section. The context answers in FIFO order, so each reply completes the
//! continuation at the front of the queue:
//!
//! - a codec error rejects only its own request
//! - a fault of the context itself is attributed to the oldest pending
//!   request and rejects it with `Transport`
//! - `terminate` (and a hard reset) rejects every pending request with
//!   `Terminated`; a reply that races it is rejected the same way

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::{Codec, CodecSession};
use crate::config::EncoderConfig;
use crate::error::{Result, TranscodeError};
use crate::types::AudioFrame;
use crate::worker::{ExecutionContext, Handler, Outcome, Reply};

/// Result of ending a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Finished {
    /// Whatever the codec still held when the stream ended
    pub chunk: Bytes,
    /// The complete output, in buffered mode only
    pub assembled: Option<Bytes>,
}

pub(crate) enum CodecRequest {
    Init,
    Encode(AudioFrame),
    End,
    Reset,
}

pub(crate) enum CodecResponse {
    Ready,
    Chunk(Bytes),
    End(Bytes),
    Reset,
    Failed(TranscodeError),
}

/// Worker-side owner of the codec session.
struct CodecHost {
    codec: Arc<dyn Codec>,
    config: EncoderConfig,
    session: Option<Box<dyn CodecSession>>,
}

impl CodecHost {
    fn session(&mut self) -> Result<&mut Box<dyn CodecSession>> {
        self.session
            .as_mut()
            .ok_or_else(|| TranscodeError::Codec("codec session not initialized".into()))
    }
}

impl Handler for CodecHost {
    type Request = CodecRequest;
    type Response = CodecResponse;

    fn handle(&mut self, request: CodecRequest) -> CodecResponse {
        let result = match request {
            CodecRequest::Init => self.codec.create(&self.config).map(|session| {
                self.session = Some(session);
                CodecResponse::Ready
            }),
            CodecRequest::Encode(frame) => self
                .session()
                .and_then(|s| s.encode(frame))
                .map(CodecResponse::Chunk),
            CodecRequest::End => self
                .session()
                .and_then(|s| s.flush())
                .map(CodecResponse::End),
            CodecRequest::Reset => self
                .session()
                .and_then(|s| s.reset())
                .map(|_| CodecResponse::Reset),
        };
        result.unwrap_or_else(CodecResponse::Failed)
    }
}

type Callback<T> = Box<dyn FnOnce(Result<T>) + Send>;

enum Continuation {
    Ready(Callback<()>),
    Chunk(Callback<Bytes>),
    End(Callback<Finished>),
    Reset(Callback<()>),
}

impl Continuation {
    fn reject(self, error: TranscodeError) {
        match self {
            Continuation::Ready(k) | Continuation::Reset(k) => k(Err(error)),
            Continuation::Chunk(k) => k(Err(error)),
            Continuation::End(k) => k(Err(error)),
        }
    }
}

/// One request awaiting its reply.
struct PendingRequest {
    seq: u64,
    continuation: Continuation,
}

/// Dispatcher-side state of one execution context generation.
struct DispatchState {
    codec: Arc<dyn Codec>,
    config: EncoderConfig,
    pending: VecDeque<PendingRequest>,
    /// Chunks of the current stream, kept in buffered mode only
    retained: Vec<Bytes>,
    /// Set once this context is shut down
    closed: bool,
    /// Worker-wide, set before `terminate` drains the queue
    terminated: Arc<AtomicBool>,
}

impl DispatchState {
    fn new(codec: Arc<dyn Codec>, config: EncoderConfig, terminated: Arc<AtomicBool>) -> Self {
        Self {
            codec,
            config,
            pending: VecDeque::new(),
            retained: Vec::new(),
            closed: false,
            terminated,
        }
    }

    fn drain(&mut self) -> Vec<PendingRequest> {
        self.closed = true;
        self.retained.clear();
        self.pending.drain(..).collect()
    }
}

fn dispatch(state: &Mutex<DispatchState>, outcome: Outcome<CodecResponse>) {
    // Work out the completion under the lock, run it outside.
    let completion: Box<dyn FnOnce() + Send> = {
        let mut state = state.lock();
        let Some(request) = state.pending.pop_front() else {
            tracing::warn!("codec reply without a pending request");
            return;
        };
        let seq = request.seq;
        tracing::trace!(seq, "codec reply");

        if state.closed || state.terminated.load(Ordering::Acquire) {
            tracing::trace!(seq, "codec reply after terminate, rejecting");
            let continuation = request.continuation;
            drop(state);
            continuation.reject(TranscodeError::Terminated);
            return;
        }

        match (request.continuation, outcome) {
            (Continuation::Ready(k), Outcome::Reply(CodecResponse::Ready)) => {
                Box::new(move || k(Ok(())))
            }
            (Continuation::Chunk(k), Outcome::Reply(CodecResponse::Chunk(chunk))) => {
                if !state.config.streaming && !chunk.is_empty() {
                    state.retained.push(chunk.clone());
                }
                Box::new(move || k(Ok(chunk)))
            }
            (Continuation::End(k), Outcome::Reply(CodecResponse::End(chunk))) => {
                let assembled = if state.config.streaming {
                    Ok(None)
                } else {
                    if !chunk.is_empty() {
                        state.retained.push(chunk.clone());
                    }
                    let retained = std::mem::take(&mut state.retained);
                    state.codec.assemble(&state.config, &retained).map(Some)
                };
                match assembled {
                    Ok(assembled) => Box::new(move || k(Ok(Finished { chunk, assembled }))),
                    Err(error) => {
                        tracing::warn!(seq, %error, "assembling the stream failed");
                        Box::new(move || k(Err(error)))
                    }
                }
            }
            (Continuation::Reset(k), Outcome::Reply(CodecResponse::Reset)) => {
                state.retained.clear();
                Box::new(move || k(Ok(())))
            }
            (continuation, Outcome::Reply(CodecResponse::Failed(error))) => {
                tracing::debug!(seq, %error, "codec request failed");
                Box::new(move || continuation.reject(error))
            }
            (continuation, Outcome::Fault(message)) => {
                tracing::warn!(seq, %message, "codec context fault, rejecting oldest request");
                Box::new(move || continuation.reject(TranscodeError::Transport(message)))
            }
            (continuation, Outcome::Reply(_)) => {
                tracing::warn!(seq, "codec reply does not match the pending request");
                Box::new(move || {
                    continuation
                        .reject(TranscodeError::Transport("mismatched codec reply".into()))
                })
            }
        }
    };
    completion();
}

/// The live execution context and its dispatch state.
struct Link {
    context: ExecutionContext<CodecRequest>,
    state: Arc<Mutex<DispatchState>>,
}

impl Link {
    fn spawn(
        codec: Arc<dyn Codec>,
        config: EncoderConfig,
        terminated: Arc<AtomicBool>,
    ) -> Result<Self> {
        let host = CodecHost {
            codec: codec.clone(),
            config: config.clone(),
            session: None,
        };
        let state = Arc::new(Mutex::new(DispatchState::new(codec, config, terminated)));
        let sink = state.clone();
        let context =
            ExecutionContext::spawn("codec", host, move |outcome| dispatch(&sink, outcome))?;
        Ok(Self { context, state })
    }

    /// Terminate the context and hand back everything still pending.
    fn shutdown(&self) -> Vec<PendingRequest> {
        self.context.terminate();
        self.state.lock().drain()
    }
}

/// Runs a [`Codec`] in an isolated execution context.
pub struct CodecWorker {
    codec: Arc<dyn Codec>,
    config: EncoderConfig,
    link: Mutex<Link>,
    next_seq: AtomicU64,
    terminated: Arc<AtomicBool>,
}

impl CodecWorker {
    /// Negotiate `config` with the codec and start its execution context.
    /// The session is created by [`CodecWorker::init`].
    pub fn new(codec: Arc<dyn Codec>, config: EncoderConfig) -> Result<Self> {
        config.validate()?;
        let config = codec.negotiate(&config)?;
        let terminated = Arc::new(AtomicBool::new(false));
        let link = Link::spawn(codec.clone(), config.clone(), terminated.clone())?;
        tracing::info!(
            codec = codec.name(),
            context = %link.context.id(),
            channels = config.channels,
            sample_rate = config.sample_rate,
            format = ?config.format,
            streaming = config.streaming,
            "codec worker started"
        );
        Ok(Self {
            codec,
            config,
            link: Mutex::new(link),
            next_seq: AtomicU64::new(0),
            terminated,
        })
    }

    /// The negotiated configuration.
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    /// Requests submitted but not yet answered.
    pub fn pending(&self) -> usize {
        self.link.lock().state.lock().pending.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Create the codec session.
    pub fn init(&self) -> Reply<()> {
        let (tx, reply) = Reply::pair();
        self.submit(
            CodecRequest::Init,
            Continuation::Ready(Box::new(move |r| {
                let _ = tx.send(r);
            })),
        );
        reply
    }

    /// Like [`CodecWorker::init`], completing through a callback.
    pub fn init_with<F>(&self, continuation: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.submit(CodecRequest::Init, Continuation::Ready(Box::new(continuation)));
    }

    /// Submit one frame; the reply carries the chunk produced for it.
    pub fn encode(&self, frame: AudioFrame) -> Reply<Bytes> {
        let (tx, reply) = Reply::pair();
        self.encode_with(frame, move |r| {
            let _ = tx.send(r);
        });
        reply
    }

    /// Submit one frame; `continuation` runs on the dispatcher thread when
    /// the reply arrives (or immediately if the worker is gone).
    pub fn encode_with<F>(&self, frame: AudioFrame, continuation: F)
    where
        F: FnOnce(Result<Bytes>) + Send + 'static,
    {
        self.submit(
            CodecRequest::Encode(frame),
            Continuation::Chunk(Box::new(continuation)),
        );
    }

    /// End the stream. In buffered mode the reply also carries the
    /// assembled output of every chunk since the last reset or end.
    pub fn end(&self) -> Reply<Finished> {
        let (tx, reply) = Reply::pair();
        self.submit(
            CodecRequest::End,
            Continuation::End(Box::new(move |r| {
                let _ = tx.send(r);
            })),
        );
        reply
    }

    /// Start a fresh output stream.
    ///
    /// A soft reset reinitializes the session in place, behind any requests
    /// already queued. A hard reset terminates the execution context first,
    /// rejecting everything pending with `Terminated`, then starts a new one
    /// and initializes it.
    pub fn reset(&self, hard: bool) -> Reply<()> {
        if !hard {
            let (tx, reply) = Reply::pair();
            self.submit(
                CodecRequest::Reset,
                Continuation::Reset(Box::new(move |r| {
                    let _ = tx.send(r);
                })),
            );
            return reply;
        }

        if self.is_terminated() {
            return Reply::resolved(Err(TranscodeError::Terminated));
        }

        let rejected = {
            let mut link = self.link.lock();
            let rejected = link.shutdown();
            match Link::spawn(
                self.codec.clone(),
                self.config.clone(),
                self.terminated.clone(),
            ) {
                Ok(fresh) => {
                    tracing::debug!(
                        old = %link.context.id(),
                        new = %fresh.context.id(),
                        rejected = rejected.len(),
                        "codec worker hard reset"
                    );
                    *link = fresh;
                }
                Err(e) => {
                    drop(link);
                    reject_all(rejected, TranscodeError::Terminated);
                    return Reply::resolved(Err(e));
                }
            }
            rejected
        };
        reject_all(rejected, TranscodeError::Terminated);
        self.init()
    }

    /// Destroy the execution context. Every pending request is rejected
    /// with `Terminated` and no further request is accepted.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let rejected = self.link.lock().shutdown();
        tracing::info!(rejected = rejected.len(), "codec worker terminated");
        reject_all(rejected, TranscodeError::Terminated);
    }

    fn submit(&self, request: CodecRequest, continuation: Continuation) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let link = self.link.lock();
        let mut state = link.state.lock();
        match link.context.post(request) {
            Ok(()) => {
                tracing::trace!(seq, "codec request submitted");
                state.pending.push_back(PendingRequest { seq, continuation });
            }
            Err(e) => {
                drop(state);
                drop(link);
                continuation.reject(e);
            }
        }
    }
}

impl Drop for CodecWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn reject_all(requests: Vec<PendingRequest>, error: TranscodeError) {
    for request in requests {
        tracing::trace!(seq = request.seq, "rejecting pending codec request");
        request.continuation.reject(error.clone());
    }
}
