//! Reply handle for one posted request

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::{Result, TranscodeError};

/// Resolves with the result of one request.
///
/// If the continuation that was supposed to complete it is dropped (the
/// execution context went away), the reply resolves as
/// [`TranscodeError::Terminated`]. There is no built-in deadline: a request
/// whose context never answers stays pending, use [`Reply::with_timeout`]
/// when that matters.
#[derive(Debug)]
pub struct Reply<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Reply<T> {
    pub(crate) fn pair() -> (oneshot::Sender<Result<T>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// A reply that is already resolved.
    pub fn resolved(result: Result<T>) -> Self {
        let (tx, reply) = Self::pair();
        let _ = tx.send(result);
        reply
    }

    /// Non-blocking check; `None` while the request is still pending.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(TranscodeError::Terminated)),
        }
    }

    /// Block the current thread until the reply arrives.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> Result<T> {
        self.rx
            .blocking_recv()
            .unwrap_or(Err(TranscodeError::Terminated))
    }

    /// Await the reply, giving up after `limit`.
    pub async fn with_timeout(self, limit: Duration) -> Result<T> {
        match tokio::time::timeout(limit, self).await {
            Ok(result) => result,
            Err(_) => Err(TranscodeError::Transport(format!(
                "no reply within {:?}",
                limit
            ))),
        }
    }
}

impl<T> Future for Reply<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TranscodeError::Terminated)))
    }
}
