//! Capture sources
//!
//! A [`Source`] delivers frames synchronously on its own thread (typically
//! a real-time capture callback) to every subscriber. Subscribers must not
//! block.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, TranscodeError};
use crate::events::SubscriptionId;
use crate::types::{AudioFrame, SampleFormat};

pub type FrameHandler = Arc<dyn Fn(AudioFrame) + Send + Sync>;

/// Producer of fixed-period audio frames.
pub trait Source: Send + Sync {
    fn channels(&self) -> usize;

    fn sample_rate(&self) -> u32;

    fn format(&self) -> SampleFormat;

    /// Start delivering frames to `handler`.
    fn subscribe(&self, handler: FrameHandler) -> SubscriptionId;

    /// Returns `false` if `id` was not subscribed.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Stop producing. Calling it again has no effect.
    fn stop(&self);
}

/// A source driven by the caller: every [`PushSource::push`] is fanned out
/// to the current subscribers.
pub struct PushSource {
    channels: usize,
    sample_rate: u32,
    format: SampleFormat,
    subscribers: Mutex<Vec<(SubscriptionId, FrameHandler)>>,
    stopped: AtomicBool,
}

impl PushSource {
    pub fn new(channels: usize, sample_rate: u32, format: SampleFormat) -> Result<Self> {
        if channels == 0 || sample_rate == 0 {
            return Err(TranscodeError::Configuration(format!(
                "invalid source: channels={} sample_rate={}",
                channels, sample_rate
            )));
        }
        Ok(Self {
            channels,
            sample_rate,
            format,
            subscribers: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        })
    }

    /// Deliver one frame. Ignored once the source is stopped.
    pub fn push(&self, frame: AudioFrame) {
        if self.is_stopped() {
            tracing::trace!("frame pushed to stopped source");
            return;
        }
        let snapshot: Vec<FrameHandler> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();

        // the last subscriber takes the frame itself
        let mut handlers = snapshot.into_iter().peekable();
        while let Some(handler) = handlers.next() {
            if handlers.peek().is_some() {
                handler(frame.clone());
            } else {
                handler(frame);
                break;
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Source for PushSource {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn format(&self) -> SampleFormat {
        self.format
    }

    fn subscribe(&self, handler: FrameHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.subscribers.lock().push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        before != subscribers.len()
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            tracing::debug!("source stopped");
        }
    }
}
