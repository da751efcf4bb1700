//! Worker-isolated resampler
//!
//! Input frames are moved to the resampler's execution context, where the
//! [`ResampleKernel`] runs. Its output comes back on the dispatcher thread,
//! is cut into fixed-size chunks and handed to `Data` listeners. When the
//! input and output rates are equal no context is started at all and frames
//! are forwarded synchronously, cast to the configured format.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;

use super::chunker::ChunkAssembler;
use super::kernel::{ResampleKernel, ResampleMode};
use crate::config::ResamplerConfig;
use crate::error::{Result, TranscodeError};
use crate::events::{Event, Observers, SubscriptionId};
use crate::types::AudioFrame;
use crate::worker::{ExecutionContext, Handler, Outcome, Reply};

/// Events emitted by a [`Resampler`].
#[derive(Debug, Clone)]
pub enum ResamplerEvent {
    /// One output chunk at the target rate
    Data(AudioFrame),
    /// The execution context failed while processing input
    Error(TranscodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResamplerEventKind {
    Data,
    Error,
}

impl Event for ResamplerEvent {
    type Kind = ResamplerEventKind;

    fn kind(&self) -> ResamplerEventKind {
        match self {
            ResamplerEvent::Data(_) => ResamplerEventKind::Data,
            ResamplerEvent::Error(_) => ResamplerEventKind::Error,
        }
    }
}

pub(crate) enum ResampleRequest {
    Process(Vec<Vec<f64>>),
    /// Finish the stream: forget carried state
    Flush,
    Reset,
}

pub(crate) enum ResampleResponse {
    Output(Vec<Vec<f64>>),
    Flushed,
    Reset,
}

impl Handler for ResampleKernel {
    type Request = ResampleRequest;
    type Response = ResampleResponse;

    fn handle(&mut self, request: ResampleRequest) -> ResampleResponse {
        match request {
            ResampleRequest::Process(inputs) => ResampleResponse::Output(self.process(&inputs)),
            ResampleRequest::Flush => {
                self.reset();
                ResampleResponse::Flushed
            }
            ResampleRequest::Reset => {
                self.reset();
                ResampleResponse::Reset
            }
        }
    }
}

/// A request posted to the context and not yet answered.
struct Inflight {
    epoch: u64,
    waiter: Option<oneshot::Sender<Result<()>>>,
}

/// Partial output, tagged with the stream epoch it belongs to. `reset`
/// bumps the epoch so output computed for the old stream is dropped.
struct Output {
    epoch: u64,
    assembler: ChunkAssembler,
}

struct Shared {
    output: Mutex<Output>,
    inflight: Mutex<VecDeque<Inflight>>,
    observers: Observers<ResamplerEvent>,
}

impl Shared {
    fn dispatch(&self, outcome: Outcome<ResampleResponse>) {
        let Some(request) = self.inflight.lock().pop_front() else {
            tracing::warn!("resampler reply without a pending request");
            return;
        };

        // Output is delivered under the output lock, so `reset` returns only
        // after every chunk of the old epoch has reached the listeners.
        match outcome {
            Outcome::Reply(ResampleResponse::Output(data)) => {
                let mut output = self.output.lock();
                if output.epoch != request.epoch {
                    tracing::trace!("dropping output of a reset stream");
                    return;
                }
                for frame in output.assembler.push(data) {
                    self.observers.emit(&ResamplerEvent::Data(frame));
                }
            }
            Outcome::Reply(ResampleResponse::Flushed) => {
                {
                    let mut output = self.output.lock();
                    if output.epoch == request.epoch {
                        let frame = output.assembler.flush();
                        self.observers.emit(&ResamplerEvent::Data(frame));
                    }
                }
                if let Some(waiter) = request.waiter {
                    let _ = waiter.send(Ok(()));
                }
            }
            Outcome::Reply(ResampleResponse::Reset) => {}
            Outcome::Fault(message) => {
                let error = TranscodeError::Transport(message);
                match request.waiter {
                    Some(waiter) => {
                        let _ = waiter.send(Err(error));
                    }
                    None => self.observers.emit(&ResamplerEvent::Error(error)),
                }
            }
        }
    }

    fn fail_pending(&self, error: TranscodeError) {
        let drained: Vec<Inflight> = self.inflight.lock().drain(..).collect();
        for request in drained {
            if let Some(waiter) = request.waiter {
                let _ = waiter.send(Err(error.clone()));
            }
        }
    }
}

/// Streaming sample-rate converter with fixed-size output chunks.
pub struct Resampler {
    config: ResamplerConfig,
    mode: ResampleMode,
    ratio: f64,
    shared: Arc<Shared>,
    /// `None` in bypass mode
    context: Option<ExecutionContext<ResampleRequest>>,
}

impl Resampler {
    pub fn new(config: ResamplerConfig) -> Result<Self> {
        config.validate()?;
        let kernel = ResampleKernel::new(config.from_rate, config.to_rate, config.channels)?;
        let mode = kernel.mode();
        let ratio = kernel.ratio();

        let shared = Arc::new(Shared {
            output: Mutex::new(Output {
                epoch: 0,
                assembler: ChunkAssembler::new(
                    config.format,
                    config.channels,
                    config.chunk_size,
                    config.to_rate,
                ),
            }),
            inflight: Mutex::new(VecDeque::new()),
            observers: Observers::new(),
        });

        let context = match mode {
            ResampleMode::Bypass => None,
            _ => {
                let sink = shared.clone();
                Some(ExecutionContext::spawn("resampler", kernel, move |outcome| {
                    sink.dispatch(outcome)
                })?)
            }
        };

        tracing::debug!(
            from = config.from_rate,
            to = config.to_rate,
            channels = config.channels,
            chunk_size = config.chunk_size,
            ?mode,
            context = ?context.as_ref().map(|c| c.id()),
            "resampler created"
        );

        Ok(Self {
            config,
            mode,
            ratio,
            shared,
            context,
        })
    }

    pub fn config(&self) -> &ResamplerConfig {
        &self.config
    }

    pub fn mode(&self) -> ResampleMode {
        self.mode
    }

    /// `from_rate / to_rate`
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Feed one input frame. The frame is consumed; output arrives later as
    /// `Data` events (synchronously in bypass mode).
    pub fn append(&self, frame: AudioFrame) -> Result<()> {
        if frame.channel_count() != self.config.channels {
            return Err(TranscodeError::ChannelMismatch {
                source_channels: frame.channel_count(),
                encoder_channels: self.config.channels,
            });
        }

        let Some(context) = &self.context else {
            let format = self.config.format;
            let channels = frame
                .channels
                .into_iter()
                .map(|c| c.cast(format))
                .collect();
            self.shared.observers.emit(&ResamplerEvent::Data(AudioFrame {
                channels,
                sample_rate: self.config.to_rate,
            }));
            return Ok(());
        };

        let inputs = frame.channels.iter().map(|c| c.to_f64()).collect();
        self.submit(context, ResampleRequest::Process(inputs), None)
    }

    /// Emit the partial output chunk (possibly empty) and clear carried
    /// state. Resolves after the chunk has been delivered to listeners.
    pub fn flush(&self) -> Reply<()> {
        let Some(context) = &self.context else {
            let frame = AudioFrame::silence(
                self.config.format,
                self.config.channels,
                0,
                self.config.to_rate,
            );
            self.shared.observers.emit(&ResamplerEvent::Data(frame));
            return Reply::resolved(Ok(()));
        };

        let (tx, reply) = Reply::pair();
        if let Err(e) = self.submit(context, ResampleRequest::Flush, Some(tx)) {
            return Reply::resolved(Err(e));
        }
        reply
    }

    /// Drop the partial output and zero the carried state. Output still in
    /// flight for earlier input is discarded; input appended after this
    /// returns belongs to the new stream.
    pub fn reset(&self) -> Result<()> {
        // The epoch bump and the Reset request form one step with respect
        // to `append`, so no input of the new epoch is queued before it.
        let mut inflight = self.shared.inflight.lock();
        let epoch = {
            let mut output = self.shared.output.lock();
            output.epoch += 1;
            output.assembler.clear();
            output.epoch
        };
        tracing::debug!(epoch, "resampler reset");
        match &self.context {
            Some(context) => {
                context.post(ResampleRequest::Reset)?;
                inflight.push_back(Inflight {
                    epoch,
                    waiter: None,
                });
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Stop the execution context. Pending flushes fail with `Terminated`,
    /// as does every later call.
    pub fn terminate(&self) {
        if let Some(context) = &self.context {
            context.terminate();
            self.shared.fail_pending(TranscodeError::Terminated);
        }
    }

    /// Listeners run while the resampler's output is locked and must not
    /// call back into it.
    pub fn on<F>(&self, kind: ResamplerEventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ResamplerEvent) + Send + Sync + 'static,
    {
        self.shared.observers.on(kind, handler)
    }

    pub fn off(&self, kind: ResamplerEventKind, id: SubscriptionId) -> bool {
        self.shared.observers.off(kind, id)
    }

    fn submit(
        &self,
        context: &ExecutionContext<ResampleRequest>,
        request: ResampleRequest,
        waiter: Option<oneshot::Sender<Result<()>>>,
    ) -> Result<()> {
        let mut inflight = self.shared.inflight.lock();
        let epoch = self.shared.output.lock().epoch;
        context.post(request)?;
        inflight.push_back(Inflight { epoch, waiter });
        Ok(())
    }
}

impl Drop for Resampler {
    fn drop(&mut self) {
        self.terminate();
    }
}
