//! Recording pipeline
//!
//! Binds a [`Source`] to a [`CodecWorker`], inserting a depth conversion and,
//! when the rates differ, a [`Resampler`]. The source callback only hands
//! work off; everything that takes time runs in the resampler's and the
//! encoder's execution contexts, and results come back as events.
//!
//! ```text
//! idle -> recording <-> paused -> flushed
//!   ^________________ reset ________|
//! ```

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::codec::{CodecWorker, Finished};
use crate::config::{EncoderConfig, ResamplerConfig};
use crate::depth::{convert_frame, ConversionOrder};
use crate::error::{Result, TranscodeError};
use crate::events::{Event, Observers, SubscriptionId};
use crate::resample::{Resampler, ResamplerEvent, ResamplerEventKind};
use crate::source::Source;
use crate::types::{AudioFrame, SampleFormat};
use crate::worker::Reply;

/// Events emitted by a [`Recorder`].
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// One encoded chunk
    Data(Bytes),
    /// The stream was finished; carries the assembled output in buffered mode
    End(Option<Bytes>),
    Error(TranscodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecorderEventKind {
    Data,
    End,
    Error,
}

impl Event for RecorderEvent {
    type Kind = RecorderEventKind;

    fn kind(&self) -> RecorderEventKind {
        match self {
            RecorderEvent::Data(_) => RecorderEventKind::Data,
            RecorderEvent::End(_) => RecorderEventKind::End,
            RecorderEvent::Error(_) => RecorderEventKind::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderStatus {
    Idle,
    Recording,
    Paused,
    Flushed,
}

/// Snapshot of the pipeline's progress.
///
/// `queued` and `finished` are advisory: nothing waits on their difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineState {
    pub status: RecorderStatus,
    pub recording: bool,
    pub queued: u64,
    pub finished: u64,
    pub flushed: bool,
}

struct Core {
    encoder: CodecWorker,
    resampler: Option<Resampler>,
    order: ConversionOrder,
    target: SampleFormat,
    status: Mutex<RecorderStatus>,
    /// Bumped by `reset`; replies of an older generation are ignored
    generation: AtomicU64,
    queued: AtomicU64,
    finished: AtomicU64,
    observers: Observers<RecorderEvent>,
}

impl Core {
    /// Source callback. The status lock is held until the frame has been
    /// handed to the next stage, so a frame is either part of the stream
    /// `reset` ends or of none.
    fn ingest(self: &Arc<Self>, frame: AudioFrame) {
        let status = self.status.lock();
        if *status != RecorderStatus::Recording {
            tracing::trace!("dropping frame while not recording");
            return;
        }
        let generation = self.generation.load(Ordering::Acquire);

        let rejected = match &self.resampler {
            Some(resampler) => {
                let frame = match self.order {
                    ConversionOrder::BeforeResample => convert_frame(frame, self.target),
                    ConversionOrder::AfterResample => frame,
                };
                resampler.append(frame).err()
            }
            None => {
                self.submit(convert_frame(frame, self.target), generation);
                None
            }
        };
        drop(status);

        if let Some(e) = rejected {
            self.observers.emit(&RecorderEvent::Error(e));
        }
    }

    /// Resampler output. Delivered under the resampler's output lock, which
    /// `reset` takes before moving to the next generation.
    fn resampled(self: &Arc<Self>, frame: AudioFrame) {
        let frame = match self.order {
            ConversionOrder::BeforeResample => frame,
            ConversionOrder::AfterResample => convert_frame(frame, self.target),
        };
        self.submit(frame, self.generation.load(Ordering::Acquire));
    }

    fn submit(self: &Arc<Self>, frame: AudioFrame, generation: u64) {
        if frame.is_empty() {
            return;
        }
        let queued = self.queued.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(queued, samples = frame.len(), "submitting frame");

        let weak = Arc::downgrade(self);
        self.encoder.encode_with(frame, move |result| {
            let Some(core) = weak.upgrade() else {
                return;
            };
            if core.generation.load(Ordering::Acquire) != generation {
                tracing::trace!("ignoring reply from before reset");
                return;
            }
            match result {
                Ok(chunk) => {
                    core.finished.fetch_add(1, Ordering::AcqRel);
                    core.observers.emit(&RecorderEvent::Data(chunk));
                }
                Err(e) => core.observers.emit(&RecorderEvent::Error(e)),
            }
        });
    }
}

/// Recorder-style pipeline orchestrator.
pub struct Recorder {
    source: Arc<dyn Source>,
    subscription: SubscriptionId,
    core: Arc<Core>,
}

impl Recorder {
    /// Wire `source` to `encoder`. Fails without side effects on the source
    /// if the channel counts differ or the resampler cannot be built.
    pub fn new(source: Arc<dyn Source>, encoder: CodecWorker) -> Result<Self> {
        let config = encoder.config().clone();
        if source.channels() != config.channels {
            return Err(TranscodeError::ChannelMismatch {
                source_channels: source.channels(),
                encoder_channels: config.channels,
            });
        }

        let order = ConversionOrder::plan(source.format(), config.format);
        let resampler = if source.sample_rate() != config.sample_rate {
            Some(Resampler::new(ResamplerConfig {
                from_rate: source.sample_rate(),
                to_rate: config.sample_rate,
                channels: config.channels,
                chunk_size: config.chunk_size,
                format: match order {
                    ConversionOrder::BeforeResample => config.format,
                    ConversionOrder::AfterResample => source.format(),
                },
            })?)
        } else {
            None
        };

        let core = Arc::new(Core {
            encoder,
            resampler,
            order,
            target: config.format,
            status: Mutex::new(RecorderStatus::Idle),
            generation: AtomicU64::new(0),
            queued: AtomicU64::new(0),
            finished: AtomicU64::new(0),
            observers: Observers::new(),
        });

        if let Some(resampler) = &core.resampler {
            let weak = Arc::downgrade(&core);
            resampler.on(ResamplerEventKind::Data, move |event| {
                if let (Some(core), ResamplerEvent::Data(frame)) = (weak.upgrade(), event) {
                    core.resampled(frame.clone());
                }
            });
            let weak = Arc::downgrade(&core);
            resampler.on(ResamplerEventKind::Error, move |event| {
                if let (Some(core), ResamplerEvent::Error(e)) = (weak.upgrade(), event) {
                    core.observers.emit(&RecorderEvent::Error(e.clone()));
                }
            });
        }

        let weak = Arc::downgrade(&core);
        core.encoder.init_with(move |result| {
            if let (Some(core), Err(e)) = (weak.upgrade(), result) {
                tracing::warn!(error = %e, "encoder init failed");
                core.observers.emit(&RecorderEvent::Error(e));
            }
        });

        let weak: Weak<Core> = Arc::downgrade(&core);
        let subscription = source.subscribe(Arc::new(move |frame: AudioFrame| {
            if let Some(core) = weak.upgrade() {
                core.ingest(frame);
            }
        }));

        tracing::info!(
            codec = core.encoder.codec_name(),
            channels = config.channels,
            source_rate = source.sample_rate(),
            target_rate = config.sample_rate,
            source_format = ?source.format(),
            target_format = ?config.format,
            ?order,
            resampling = core.resampler.is_some(),
            "recorder created"
        );

        Ok(Self {
            source,
            subscription,
            core,
        })
    }

    /// Accept frames from the source.
    pub fn record(&self) -> Result<()> {
        let mut status = self.core.status.lock();
        if *status == RecorderStatus::Flushed {
            return Err(TranscodeError::Flushed);
        }
        *status = RecorderStatus::Recording;
        Ok(())
    }

    /// Drop frames from the source until `record` is called again.
    pub fn pause(&self) -> Result<()> {
        let mut status = self.core.status.lock();
        match *status {
            RecorderStatus::Flushed => Err(TranscodeError::Flushed),
            RecorderStatus::Recording => {
                *status = RecorderStatus::Paused;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// End the stream: flush the resampler, end the encoder and emit the
    /// final chunk followed by `End`. Fails with `Flushed` if the stream
    /// was already finished and not reset since.
    ///
    /// If the resampler cannot be flushed the previous status is restored.
    /// If the encoder fails to end, the recorder stays flushed until `reset`.
    pub async fn finish(&self) -> Result<Finished> {
        let (previous, generation) = {
            let mut status = self.core.status.lock();
            if *status == RecorderStatus::Flushed {
                return Err(TranscodeError::Flushed);
            }
            let previous = std::mem::replace(&mut *status, RecorderStatus::Flushed);
            (previous, self.core.generation.load(Ordering::Acquire))
        };

        if let Some(resampler) = &self.core.resampler {
            if let Err(e) = resampler.flush().await {
                tracing::warn!(error = %e, "resampler flush failed");
                {
                    let mut status = self.core.status.lock();
                    let current = self.core.generation.load(Ordering::Acquire);
                    if *status == RecorderStatus::Flushed && current == generation {
                        *status = previous;
                    }
                }
                self.core.observers.emit(&RecorderEvent::Error(e.clone()));
                return Err(e);
            }
        }

        self.core.queued.fetch_add(1, Ordering::AcqRel);
        match self.core.encoder.end().await {
            Ok(finished) => {
                self.core.finished.fetch_add(1, Ordering::AcqRel);
                tracing::debug!(
                    final_chunk = finished.chunk.len(),
                    assembled = ?finished.assembled.as_ref().map(|b| b.len()),
                    "recording finished"
                );
                self.core
                    .observers
                    .emit(&RecorderEvent::Data(finished.chunk.clone()));
                self.core
                    .observers
                    .emit(&RecorderEvent::End(finished.assembled.clone()));
                Ok(finished)
            }
            Err(e) => {
                self.core.observers.emit(&RecorderEvent::Error(e.clone()));
                Err(e)
            }
        }
    }

    /// Return to `Idle` with zeroed counters and a fresh output stream.
    /// The reply resolves when the encoder has been reset.
    pub fn reset(&self, hard: bool) -> Reply<()> {
        {
            // Blocks ingestion; the resampler reset waits for output already
            // being delivered, which still belongs to the old generation.
            let mut status = self.core.status.lock();
            *status = RecorderStatus::Idle;
            if let Some(resampler) = &self.core.resampler {
                if let Err(e) = resampler.reset() {
                    return Reply::resolved(Err(e));
                }
            }
            self.core.generation.fetch_add(1, Ordering::AcqRel);
            self.core.queued.store(0, Ordering::Release);
            self.core.finished.store(0, Ordering::Release);
        }
        tracing::debug!(hard, "recorder reset");
        self.core.encoder.reset(hard)
    }

    pub fn state(&self) -> PipelineState {
        let status = *self.core.status.lock();
        PipelineState {
            status,
            recording: status == RecorderStatus::Recording,
            queued: self.core.queued.load(Ordering::Acquire),
            finished: self.core.finished.load(Ordering::Acquire),
            flushed: status == RecorderStatus::Flushed,
        }
    }

    /// Frames submitted to the encoder and not answered yet.
    pub fn outstanding(&self) -> u64 {
        let state = self.state();
        state.queued.saturating_sub(state.finished)
    }

    pub fn conversion_order(&self) -> ConversionOrder {
        self.core.order
    }

    pub fn is_resampling(&self) -> bool {
        self.core.resampler.is_some()
    }

    /// The encoder's negotiated configuration.
    pub fn encoder_config(&self) -> &EncoderConfig {
        self.core.encoder.config()
    }

    pub fn on<F>(&self, kind: RecorderEventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&RecorderEvent) + Send + Sync + 'static,
    {
        self.core.observers.on(kind, handler)
    }

    pub fn off(&self, kind: RecorderEventKind, id: SubscriptionId) -> bool {
        self.core.observers.off(kind, id)
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.source.unsubscribe(self.subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{parse_header, WavCodec};
    use crate::source::PushSource;
    use crate::types::ChannelBuffer;

    fn wav_encoder(channels: usize, sample_rate: u32, format: SampleFormat) -> CodecWorker {
        CodecWorker::new(
            Arc::new(WavCodec),
            EncoderConfig {
                channels,
                sample_rate,
                format,
                streaming: false,
                chunk_size: 64,
            },
        )
        .unwrap()
    }

    fn pipeline(
        source_rate: u32,
        source_format: SampleFormat,
        encoder: CodecWorker,
    ) -> (Arc<PushSource>, Recorder) {
        let channels = encoder.config().channels;
        let source = Arc::new(PushSource::new(channels, source_rate, source_format).unwrap());
        let recorder = Recorder::new(source.clone(), encoder).unwrap();
        (source, recorder)
    }

    fn events(recorder: &Recorder, kind: RecorderEventKind) -> Arc<Mutex<Vec<RecorderEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        recorder.on(kind, move |e| sink.lock().push(e.clone()));
        seen
    }

    fn i16_frame(channels: usize, samples: Vec<i16>, rate: u32) -> AudioFrame {
        AudioFrame::new(vec![ChannelBuffer::I16(samples); channels], rate).unwrap()
    }

    #[test]
    fn test_channel_mismatch() {
        let source: Arc<dyn Source> =
            Arc::new(PushSource::new(1, 44100, SampleFormat::I16).unwrap());
        let result = Recorder::new(source.clone(), wav_encoder(2, 44100, SampleFormat::I16));
        assert!(matches!(
            result,
            Err(TranscodeError::ChannelMismatch {
                source_channels: 1,
                encoder_channels: 2
            })
        ));
    }

    #[test]
    fn test_plan_and_stages() {
        let (_, recorder) = pipeline(22050, SampleFormat::I16, wav_encoder(2, 44100, SampleFormat::F32));
        assert_eq!(recorder.conversion_order(), ConversionOrder::BeforeResample);
        assert!(recorder.is_resampling());

        let (_, recorder) = pipeline(44100, SampleFormat::F32, wav_encoder(2, 44100, SampleFormat::I16));
        assert_eq!(recorder.conversion_order(), ConversionOrder::AfterResample);
        assert!(!recorder.is_resampling());
    }

    #[tokio::test]
    async fn test_idle_and_paused_frames_are_dropped() {
        let (source, recorder) = pipeline(8000, SampleFormat::I16, wav_encoder(1, 8000, SampleFormat::I16));

        source.push(i16_frame(1, vec![9; 4], 8000));
        recorder.record().unwrap();
        source.push(i16_frame(1, vec![1, 2], 8000));
        recorder.pause().unwrap();
        assert!(!recorder.state().recording);
        source.push(i16_frame(1, vec![7; 8], 8000));

        let finished = recorder.finish().await.unwrap();
        let assembled = finished.assembled.unwrap();
        assert_eq!(parse_header(&assembled).unwrap().data_len, 4);
        assert_eq!(&assembled[44..], &[1, 0, 2, 0]);
    }

    #[tokio::test]
    async fn test_counters_and_events() {
        let (source, recorder) = pipeline(8000, SampleFormat::I16, wav_encoder(2, 8000, SampleFormat::I16));
        let data = events(&recorder, RecorderEventKind::Data);
        let end = events(&recorder, RecorderEventKind::End);

        recorder.record().unwrap();
        for _ in 0..5 {
            source.push(i16_frame(2, vec![3; 16], 8000));
        }
        recorder.finish().await.unwrap();

        let state = recorder.state();
        assert_eq!(state.queued, 6);
        assert_eq!(state.finished, 6);
        assert!(state.flushed);
        assert_eq!(recorder.outstanding(), 0);

        // five chunks plus the (empty) final chunk, then one End
        assert_eq!(data.lock().len(), 6);
        let end = end.lock();
        assert_eq!(end.len(), 1);
        match &end[0] {
            RecorderEvent::End(Some(blob)) => assert_eq!(blob.len(), 44 + 5 * 16 * 2 * 2),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_finish_twice_fails_until_reset() {
        let (_, recorder) = pipeline(8000, SampleFormat::I16, wav_encoder(1, 8000, SampleFormat::I16));
        recorder.record().unwrap();
        recorder.finish().await.unwrap();

        assert!(matches!(recorder.finish().await, Err(TranscodeError::Flushed)));
        assert_eq!(recorder.record(), Err(TranscodeError::Flushed));
        assert_eq!(recorder.pause(), Err(TranscodeError::Flushed));

        recorder.reset(false).await.unwrap();
        let state = recorder.state();
        assert_eq!(state.status, RecorderStatus::Idle);
        assert_eq!((state.queued, state.finished, state.flushed), (0, 0, false));
        recorder.record().unwrap();
        recorder.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_hard_reset_starts_new_stream() {
        let (source, recorder) = pipeline(8000, SampleFormat::I16, wav_encoder(1, 8000, SampleFormat::I16));
        recorder.record().unwrap();
        source.push(i16_frame(1, vec![5; 10], 8000));

        recorder.reset(true).await.unwrap();
        recorder.record().unwrap();
        source.push(i16_frame(1, vec![6; 3], 8000));

        let finished = recorder.finish().await.unwrap();
        let assembled = finished.assembled.unwrap();
        assert_eq!(parse_header(&assembled).unwrap().data_len, 6);
    }

    #[tokio::test]
    async fn test_resampled_pipeline_converts_after() {
        let (source, recorder) =
            pipeline(16000, SampleFormat::F32, wav_encoder(1, 8000, SampleFormat::I16));
        assert_eq!(recorder.conversion_order(), ConversionOrder::AfterResample);

        recorder.record().unwrap();
        for _ in 0..3 {
            source.push(AudioFrame::new(vec![ChannelBuffer::F32(vec![0.5; 100])], 16000).unwrap());
        }
        let finished = recorder.finish().await.unwrap();
        let assembled = finished.assembled.unwrap();
        let header = parse_header(&assembled).unwrap();
        assert_eq!(header.sample_rate, 8000);
        assert_eq!(header.data_len, 150 * 2);
        // 0.5 * 32768
        assert!(assembled[44..]
            .chunks(2)
            .all(|s| i16::from_le_bytes([s[0], s[1]]) == 16384));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let (source, recorder) = pipeline(8000, SampleFormat::I16, wav_encoder(1, 8000, SampleFormat::I16));
        assert_eq!(source.subscriber_count(), 1);
        drop(recorder);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_frame_emits_error_and_keeps_recording() {
        let (source, recorder) = pipeline(8000, SampleFormat::I16, wav_encoder(2, 8000, SampleFormat::I16));
        let data = events(&recorder, RecorderEventKind::Data);
        let errors = events(&recorder, RecorderEventKind::Error);

        recorder.record().unwrap();
        source.push(i16_frame(2, vec![1; 4], 8000));
        // a mono frame cannot be encoded as stereo
        source.push(i16_frame(1, vec![2; 4], 8000));
        source.push(i16_frame(2, vec![3; 4], 8000));

        for _ in 0..200 {
            if data.lock().len() == 2 && errors.lock().len() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(data.lock().len(), 2);
        let state = recorder.state();
        assert_eq!(state.status, RecorderStatus::Recording);
        assert!(state.recording);
        assert_eq!((state.queued, state.finished), (3, 2));

        let finished = recorder.finish().await.unwrap();
        assert_eq!(parse_header(&finished.assembled.unwrap()).unwrap().data_len, 2 * 4 * 2 * 2);

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            RecorderEvent::Error(TranscodeError::ChannelMismatch {
                source_channels: 1,
                encoder_channels: 2
            })
        ));
        // the two encoded chunks and the final one
        assert_eq!(data.lock().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reset_during_capture_starts_clean_stream() {
        for source_rate in [8000, 16000] {
            for _ in 0..100 {
                let (source, recorder) =
                    pipeline(source_rate, SampleFormat::I16, wav_encoder(1, 8000, SampleFormat::I16));
                recorder.record().unwrap();

                let feeder = {
                    let source = source.clone();
                    std::thread::spawn(move || {
                        for _ in 0..200 {
                            source.push(i16_frame(1, vec![7; 32], source_rate));
                        }
                    })
                };
                recorder.reset(false).await.unwrap();
                let finished = recorder.finish().await.unwrap();
                feeder.join().unwrap();

                // recording was never re-armed after the reset
                let header = parse_header(&finished.assembled.unwrap()).unwrap();
                assert_eq!(header.data_len, 0);
            }
        }
    }

    #[tokio::test]
    async fn test_failed_resampler_flush_restores_status() {
        let (_, recorder) = pipeline(16000, SampleFormat::I16, wav_encoder(1, 8000, SampleFormat::I16));
        let errors = events(&recorder, RecorderEventKind::Error);
        recorder.record().unwrap();

        if let Some(resampler) = &recorder.core.resampler {
            resampler.terminate();
        }
        assert_eq!(recorder.finish().await, Err(TranscodeError::Terminated));
        assert_eq!(recorder.state().status, RecorderStatus::Recording);
        assert_eq!(errors.lock().len(), 1);
    }
}
