//! The byte-moving capability the uploader drives.
//!
//! The uploader never talks to the network itself: every chunk goes through a
//! [`Transport`], which reports how far it got through a [`ProgressSink`].

mod http;

pub use http::HttpTransport;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

/// Receives `(loaded, total)` byte counts for the chunk a transport is sending.
///
/// `loaded` is absolute, not a delta. Transports must report non-decreasing
/// values for one chunk; the uploader stores what it is given, so a regression
/// shows up as a dip in the request's progress.
#[derive(Clone)]
pub struct ProgressSink {
    report: Arc<dyn Fn(u64, u64) + Send + Sync>,
}

impl ProgressSink {
    pub fn new<F>(report: F) -> Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        Self {
            report: Arc::new(report),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_, _| {})
    }

    pub fn report(&self, loaded: u64, total: u64) {
        (self.report)(loaded, total)
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `chunk` to `destination`, resolving to the destination's response data.
    async fn upload(
        &self,
        chunk: Bytes,
        destination: &str,
        progress: ProgressSink,
    ) -> Result<Value, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn upload(
        &self,
        chunk: Bytes,
        destination: &str,
        progress: ProgressSink,
    ) -> Result<Value, TransportError> {
        (**self).upload(chunk, destination, progress).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {destination} failed: {source}")]
    Http {
        destination: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{destination} rejected the upload with status {status}: {body}")]
    Status {
        destination: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("response was not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload was interrupted before it settled")]
    Interrupted,

    #[error("{0}")]
    Other(String),
}
