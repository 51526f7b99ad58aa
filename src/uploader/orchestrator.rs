use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use super::error::SubmitError;
use super::planner;
use super::progress::ProgressAggregator;
use super::request::{
    BatchCompletion, BatchSubmission, Completion, Settlement, Submission, UploadId, UploadRequest,
};
use super::state::{Event, Snapshot, UploadRecord, UploadState};
use crate::config::{Config, ConfigError};
use crate::transport::{ProgressSink, Transport, TransportError};
use crate::utils::job_pool;

type Hook = Arc<dyn Fn(UploadId) + Send + Sync>;
type Outcome = Result<Value, Arc<TransportError>>;

/// Runs submitted requests through a [`Transport`], at most `threads` at a time.
///
/// Cloning is cheap; every clone drives the same queue. Requests are
/// dispatched whenever one is submitted or one settles. All methods must be
/// called from within a tokio runtime.
#[derive(Clone)]
pub struct Uploader {
    shared: Arc<Shared>,
}

pub struct UploaderBuilder {
    config: Config,
    transport: Arc<dyn Transport>,
    on_upload_start: Option<Hook>,
    on_upload_complete: Option<Hook>,
}

impl UploaderBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = threads;
        self
    }

    /// Called when a request is dispatched to the transport.
    pub fn on_upload_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(UploadId) + Send + Sync + 'static,
    {
        self.on_upload_start = Some(Arc::new(hook));
        self
    }

    /// Called when a request completes successfully.
    pub fn on_upload_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(UploadId) + Send + Sync + 'static,
    {
        self.on_upload_complete = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<Uploader, ConfigError> {
        let threads = self.config.threads()?;
        let (snapshots, _) = watch::channel(Snapshot::default());
        Ok(Uploader {
            shared: Arc::new(Shared {
                threads,
                transport: self.transport,
                on_upload_start: self.on_upload_start,
                on_upload_complete: self.on_upload_complete,
                inner: Mutex::new(Inner::default()),
                snapshots,
            }),
        })
    }
}

impl Uploader {
    pub fn new<T>(config: Config, transport: T) -> Result<Self, ConfigError>
    where
        T: Transport + 'static,
    {
        Self::builder(transport).config(config).build()
    }

    pub fn builder<T>(transport: T) -> UploaderBuilder
    where
        T: Transport + 'static,
    {
        UploaderBuilder {
            config: Config::default(),
            transport: Arc::new(transport),
            on_upload_start: None,
            on_upload_complete: None,
        }
    }

    pub fn threads(&self) -> NonZeroUsize {
        self.shared.threads
    }

    /// Registers one request as queued and returns its id with a completion handle.
    pub fn submit(&self, request: UploadRequest) -> Result<Submission, SubmitError> {
        let (id, completion) = {
            let mut inner = self.shared.lock();
            let registered = inner.enqueue(request)?;
            self.shared.publish(&inner.state);
            registered
        };
        self.shared.pump();
        Ok(Submission { id, completion })
    }

    /// Registers every request, or none if any of them is malformed.
    pub fn submit_batch(&self, requests: Vec<UploadRequest>) -> Result<BatchSubmission, SubmitError> {
        if requests.iter().any(|request| request.destinations.is_empty()) {
            return Err(SubmitError::NoDestinations);
        }

        let (ids, completions): (Vec<_>, Vec<_>) = {
            let mut inner = self.shared.lock();
            let registered = requests
                .into_iter()
                .map(|request| inner.enqueue(request))
                .collect::<Result<Vec<_>, _>>()?;
            self.shared.publish(&inner.state);
            registered.into_iter().unzip()
        };
        self.shared.pump();

        Ok(BatchSubmission {
            ids,
            completion: BatchCompletion::new(completions),
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshots.borrow().clone()
    }

    pub fn record(&self, id: UploadId) -> Option<UploadRecord> {
        self.shared.lock().state.record(id).cloned()
    }

    pub fn is_uploading(&self) -> bool {
        self.shared.lock().state.is_uploading()
    }

    /// A receiver that is notified with a fresh snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Waits until every submitted request has settled.
    pub async fn wait_idle(&self) {
        let mut snapshots = self.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = snapshots.wait_for(|snapshot| !snapshot.is_uploading).await;
    }
}

struct Shared {
    threads: NonZeroUsize,
    transport: Arc<dyn Transport>,
    on_upload_start: Option<Hook>,
    on_upload_complete: Option<Hook>,
    inner: Mutex<Inner>,
    snapshots: watch::Sender<Snapshot>,
}

#[derive(Default)]
struct Inner {
    state: UploadState,
    pending: HashMap<UploadId, Pending>,
}

/// Orchestrator-side bookkeeping for a request that has not settled yet.
struct Pending {
    /// Taken when the request is dispatched.
    request: Option<UploadRequest>,
    /// Per-part counters of a partitioned request, folded under the same lock as the record.
    parts: Option<ProgressAggregator>,
    notify: oneshot::Sender<Settlement>,
}

impl Inner {
    fn enqueue(&mut self, request: UploadRequest) -> Result<(UploadId, Completion), SubmitError> {
        if request.destinations.is_empty() {
            return Err(SubmitError::NoDestinations);
        }

        let id = UploadId::new();
        self.state.apply(Event::Request {
            id,
            size: request.size(),
        })?;
        debug!(
            %id,
            bytes = request.size(),
            destinations = request.destinations.len(),
            "upload queued"
        );

        let (notify, completion) = Completion::channel();
        self.pending.insert(
            id,
            Pending {
                request: Some(request),
                parts: None,
                notify,
            },
        );
        Ok((id, completion))
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &UploadState) {
        self.snapshots.send_replace(state.snapshot());
    }

    /// Starts as many queued requests as the thread limit allows.
    fn pump(self: &Arc<Self>) {
        let started = {
            let mut inner = self.lock();
            let free = self.threads.get().saturating_sub(inner.state.active_count());
            let ids = inner.state.pending().take(free).collect::<Vec<_>>();

            let mut started = Vec::with_capacity(ids.len());
            for id in ids {
                if let Err(err) = inner.state.apply(Event::Start { id }) {
                    warn!(%id, %err, "could not start upload");
                    continue;
                }
                if let Some(request) = inner
                    .pending
                    .get_mut(&id)
                    .and_then(|pending| pending.request.take())
                {
                    started.push((id, request));
                }
            }
            if !started.is_empty() {
                self.publish(&inner.state);
            }
            started
        };

        for (id, request) in started {
            info!(%id, bytes = request.size(), "upload started");
            if let Some(hook) = &self.on_upload_start {
                hook(id);
            }
            tokio::spawn(run_upload(Arc::clone(self), id, request));
        }
    }

    fn progress(&self, id: UploadId, loaded: u64, total: u64) {
        let mut inner = self.lock();
        match inner.state.apply(Event::Progress { id, loaded, total }) {
            Ok(()) => self.publish(&inner.state),
            Err(err) => debug!(%id, %err, "progress dropped"),
        }
    }

    fn track_parts(&self, id: UploadId, aggregator: ProgressAggregator) {
        if let Some(pending) = self.lock().pending.get_mut(&id) {
            pending.parts = Some(aggregator);
        }
    }

    /// Records one part's count and applies the new aggregate under a single lock hold.
    fn part_progress(&self, id: UploadId, index: usize, loaded: u64) {
        let mut inner = self.lock();
        let Some(progress) = inner
            .pending
            .get_mut(&id)
            .and_then(|pending| pending.parts.as_mut())
            .map(|parts| parts.record(index, loaded))
        else {
            debug!(%id, index, "part progress dropped");
            return;
        };
        match inner.state.apply(Event::Progress {
            id,
            loaded: progress.loaded,
            total: progress.total,
        }) {
            Ok(()) => self.publish(&inner.state),
            Err(err) => debug!(%id, %err, "progress dropped"),
        }
    }

    /// Applies the terminal event and resolves the request's completion exactly once.
    fn settle(&self, id: UploadId, outcome: Outcome) {
        let notify = {
            let mut inner = self.lock();
            let event = match &outcome {
                Ok(data) => Event::Complete {
                    id,
                    data: data.clone(),
                },
                Err(error) => Event::Error {
                    id,
                    error: Arc::clone(error),
                },
            };
            if let Err(err) = inner.state.apply(event) {
                warn!(%id, %err, "settlement dropped");
                return;
            }
            self.publish(&inner.state);
            inner.pending.remove(&id).map(|pending| pending.notify)
        };

        match &outcome {
            Ok(_) => {
                info!(%id, "upload complete");
                if let Some(hook) = &self.on_upload_complete {
                    hook(id);
                }
            }
            Err(err) => warn!(%id, %err, "upload failed"),
        }

        if let Some(notify) = notify {
            // nobody listening is fine
            let _ = notify.send(Settlement::from_outcome(&outcome));
        }
    }
}

async fn run_upload(shared: Arc<Shared>, id: UploadId, request: UploadRequest) {
    let outcome = match request.destinations.as_slice() {
        [destination] => upload_whole(&shared, id, request.payload, destination).await,
        destinations => upload_parts(&shared, id, request.payload, destinations).await,
    };
    shared.settle(id, outcome);
    shared.pump();
}

async fn upload_whole(shared: &Arc<Shared>, id: UploadId, payload: Bytes, destination: &str) -> Outcome {
    let sink = {
        let shared = Arc::clone(shared);
        ProgressSink::new(move |loaded, total| shared.progress(id, loaded, total))
    };
    shared
        .transport
        .upload(payload, destination, sink)
        .await
        .map_err(Arc::new)
}

/// Uploads one part per destination through the job pool and folds the results.
///
/// Waits for every part. The first part to fail, in arrival order, becomes the
/// request's error; otherwise the data is the per-part results in destination order.
async fn upload_parts(
    shared: &Arc<Shared>,
    id: UploadId,
    payload: Bytes,
    destinations: &[String],
) -> Outcome {
    let total = payload.len() as u64;
    let parts = planner::plan(total, destinations)
        .map_err(|err| Arc::new(TransportError::Other(err.to_string())))?;
    debug!(%id, parts = parts.len(), "upload split");

    shared.track_parts(id, ProgressAggregator::new(parts.len(), total));
    let first_failure: Mutex<Option<Arc<TransportError>>> = Mutex::new(None);

    let jobs = parts
        .into_iter()
        .map(|part| {
            let first_failure = &first_failure;
            let transport = Arc::clone(&shared.transport);
            let chunk = payload.slice(part.range.start as usize..part.range.end as usize);
            let sink = {
                let shared = Arc::clone(shared);
                let index = part.index;
                ProgressSink::new(move |loaded, _| shared.part_progress(id, index, loaded))
            };
            move || async move {
                let outcome = transport
                    .upload(chunk, &part.destination, sink)
                    .await
                    .map_err(Arc::new);
                if let Err(err) = &outcome {
                    debug!(%id, part = part.index, %err, "part failed");
                    first_failure
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get_or_insert_with(|| Arc::clone(err));
                }
                outcome
            }
        })
        .collect::<Vec<_>>();

    let results = job_pool::run(jobs, shared.threads).await;

    match first_failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
        Some(err) => Err(err),
        None => Ok(Value::Array(results.into_iter().flatten().collect())),
    }
}
