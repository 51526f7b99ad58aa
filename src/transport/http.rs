use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde_json::Value;
use tracing::debug;

use super::{ProgressSink, Transport, TransportError};
use crate::config::Config;

/// Uploads chunks with `PUT`, streaming the body so progress can be reported per frame.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    frame_size: usize,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            frame_size: Config::DEFAULT_FRAME_SIZE,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(|source| TransportError::Http {
            destination: String::from("<client>"),
            source,
        })?;
        Ok(Self::with_client(client).frame_size(config.frame_size))
    }

    pub fn frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size.max(1);
        self
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `chunk` into frames, reporting the cumulative byte count as each frame is handed to the client.
fn frames(
    chunk: Bytes,
    frame_size: usize,
    progress: ProgressSink,
) -> impl Stream<Item = io::Result<Bytes>> + Send + Sync + 'static {
    let total = chunk.len() as u64;
    let mut offset = 0;
    stream::iter(std::iter::from_fn(move || {
        if offset >= chunk.len() {
            return None;
        }
        let end = (offset + frame_size).min(chunk.len());
        let frame = chunk.slice(offset..end);
        offset = end;
        progress.report(end as u64, total);
        Some(Ok(frame))
    }))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn upload(
        &self,
        chunk: Bytes,
        destination: &str,
        progress: ProgressSink,
    ) -> Result<Value, TransportError> {
        let total = chunk.len() as u64;
        debug!(destination, bytes = total, "sending chunk");

        let http_err = |source| TransportError::Http {
            destination: destination.to_string(),
            source,
        };

        let body = reqwest::Body::wrap_stream(frames(chunk, self.frame_size, progress));
        let response = self
            .client
            .put(destination)
            .header(CONTENT_LENGTH, total)
            .body(body)
            .send()
            .await
            .map_err(http_err)?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));
        let text = response.text().await.map_err(http_err)?;

        if !status.is_success() {
            return Err(TransportError::Status {
                destination: destination.to_string(),
                status,
                body: text,
            });
        }

        if is_json {
            Ok(serde_json::from_str(&text)?)
        } else {
            Ok(Value::String(text))
        }
    }
}
