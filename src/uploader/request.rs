use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::transport::TransportError;

/// Identity of one submitted request, stable for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A payload and where it goes.
///
/// One destination uploads the whole payload. Two or more split the payload
/// into one contiguous part per destination.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub payload: Bytes,
    pub destinations: Vec<String>,
}

impl UploadRequest {
    pub fn new(payload: impl Into<Bytes>, destination: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            destinations: vec![destination.into()],
        }
    }

    pub fn split<I, S>(payload: impl Into<Bytes>, destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            payload: payload.into(),
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }
}

/// Terminal outcome of one request: exactly one of `data` and `error` is set.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub data: Option<Value>,
    pub error: Option<Arc<TransportError>>,
}

impl Settlement {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub(crate) fn from_outcome(outcome: &Result<Value, Arc<TransportError>>) -> Self {
        match outcome {
            Ok(data) => Self {
                data: Some(data.clone()),
                error: None,
            },
            Err(error) => Self {
                data: None,
                error: Some(Arc::clone(error)),
            },
        }
    }
}

/// Resolves once the request it belongs to reaches a terminal state.
///
/// Dropping it does not affect the upload.
#[must_use = "a completion does nothing unless awaited or given a callback"]
pub struct Completion {
    rx: oneshot::Receiver<Settlement>,
}

impl Completion {
    pub(crate) fn channel() -> (oneshot::Sender<Settlement>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Calls `callback` once with the settlement, from a spawned task.
    pub fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(Settlement) + Send + 'static,
    {
        tokio::spawn(async move { callback(self.await) });
    }
}

impl Future for Completion {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let settlement = match ready!(Pin::new(&mut self.rx).poll(cx)) {
            Ok(settlement) => settlement,
            Err(_) => Settlement {
                data: None,
                error: Some(Arc::new(TransportError::Interrupted)),
            },
        };
        Poll::Ready(settlement)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

/// Resolves to every member's settlement, in submission order.
#[must_use = "a completion does nothing unless awaited or given a callback"]
pub struct BatchCompletion {
    inner: BoxFuture<'static, Vec<Settlement>>,
}

impl BatchCompletion {
    pub(crate) fn new(completions: Vec<Completion>) -> Self {
        Self {
            inner: join_all(completions).boxed(),
        }
    }

    /// Calls `callback` once with all settlements, from a spawned task.
    pub fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(Vec<Settlement>) + Send + 'static,
    {
        tokio::spawn(async move { callback(self.await) });
    }
}

impl Future for BatchCompletion {
    type Output = Vec<Settlement>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for BatchCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCompletion").finish_non_exhaustive()
    }
}

/// A registered request.
#[derive(Debug)]
pub struct Submission {
    pub id: UploadId,
    pub completion: Completion,
}

/// A registered batch; `ids` follows the order the requests were given in.
#[derive(Debug)]
pub struct BatchSubmission {
    pub ids: Vec<UploadId>,
    pub completion: BatchCompletion,
}
