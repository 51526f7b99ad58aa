//! Lifecycle of every submitted request.
//!
//! [`UploadState::apply`] is the only way records and the queue change. It does
//! no I/O; the orchestrator feeds it events and publishes the result.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::error::StateError;
use super::progress::Progress;
use super::request::UploadId;
use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Queued,
    Active,
    Complete,
    Errored,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Complete | UploadStatus::Errored)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UploadStatus::Queued => "queued",
            UploadStatus::Active => "active",
            UploadStatus::Complete => "complete",
            UploadStatus::Errored => "errored",
        })
    }
}

/// What the binding layer sees for one request.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub status: UploadStatus,
    pub is_uploading: bool,
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    pub loaded: u64,
    pub total: u64,
    pub data: Option<Value>,
    pub error: Option<Arc<TransportError>>,
}

impl UploadRecord {
    fn queued(total: u64) -> Self {
        Self {
            status: UploadStatus::Queued,
            is_uploading: false,
            progress: 0.0,
            loaded: 0,
            total,
            data: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Request { id: UploadId, size: u64 },
    Start { id: UploadId },
    Progress { id: UploadId, loaded: u64, total: u64 },
    Complete { id: UploadId, data: Value },
    Error { id: UploadId, error: Arc<TransportError> },
}

impl Event {
    pub fn id(&self) -> UploadId {
        match self {
            Event::Request { id, .. }
            | Event::Start { id }
            | Event::Progress { id, .. }
            | Event::Complete { id, .. }
            | Event::Error { id, .. } => *id,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Event::Request { .. } => "request",
            Event::Start { .. } => "start",
            Event::Progress { .. } => "progress",
            Event::Complete { .. } => "complete",
            Event::Error { .. } => "error",
        }
    }
}

/// Point-in-time copy of the state for the binding layer.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// True while any submitted request has not reached a terminal state.
    pub is_uploading: bool,
    pub records: HashMap<UploadId, UploadRecord>,
}

/// Every record plus the queue of unresolved ids in submission order.
///
/// An id is in the queue exactly while its record is queued or active.
#[derive(Debug, Clone, Default)]
pub struct UploadState {
    records: HashMap<UploadId, UploadRecord>,
    queue: Vec<UploadId>,
}

impl UploadState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event. On `Err` nothing was changed.
    pub fn apply(&mut self, event: Event) -> Result<(), StateError> {
        let id = event.id();

        if let Event::Request { size, .. } = event {
            if self.records.contains_key(&id) {
                return Err(StateError::Duplicate(id));
            }
            self.records.insert(id, UploadRecord::queued(size));
            self.queue.push(id);
            return Ok(());
        }

        let record = self.records.get_mut(&id).ok_or(StateError::Unknown(id))?;
        let expected = match event {
            Event::Start { .. } => UploadStatus::Queued,
            _ => UploadStatus::Active,
        };
        if record.status != expected {
            return Err(StateError::InvalidTransition {
                id,
                event: event.name(),
                status: record.status,
            });
        }

        match event {
            Event::Request { .. } => unreachable!("handled above"),
            Event::Start { .. } => {
                record.status = UploadStatus::Active;
                record.is_uploading = true;
            }
            Event::Progress { loaded, total, .. } => {
                record.loaded = loaded;
                record.total = total;
                record.progress = Progress::new(loaded, total).fraction();
            }
            Event::Complete { data, .. } => {
                record.status = UploadStatus::Complete;
                record.is_uploading = false;
                record.progress = 1.0;
                record.loaded = record.total;
                record.data = Some(data);
                self.queue.retain(|queued| *queued != id);
            }
            Event::Error { error, .. } => {
                record.status = UploadStatus::Errored;
                record.is_uploading = false;
                record.error = Some(error);
                self.queue.retain(|queued| *queued != id);
            }
        }
        Ok(())
    }

    /// Overall flag: false once every submitted request is terminal.
    pub fn is_uploading(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn queue(&self) -> &[UploadId] {
        &self.queue
    }

    pub fn record(&self, id: UploadId) -> Option<&UploadRecord> {
        self.records.get(&id)
    }

    pub fn active_count(&self) -> usize {
        self.queue
            .iter()
            .filter(|id| self.status(**id) == Some(UploadStatus::Active))
            .count()
    }

    /// Queued ids not yet started, in submission order.
    pub fn pending(&self) -> impl Iterator<Item = UploadId> + '_ {
        self.queue
            .iter()
            .copied()
            .filter(|id| self.status(*id) == Some(UploadStatus::Queued))
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            is_uploading: self.is_uploading(),
            records: self.records.clone(),
        }
    }

    fn status(&self, id: UploadId) -> Option<UploadStatus> {
        self.records.get(&id).map(|record| record.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requested(size: u64) -> (UploadState, UploadId) {
        let mut state = UploadState::new();
        let id = UploadId::new();
        state.apply(Event::Request { id, size }).unwrap();
        (state, id)
    }

    fn failure() -> Arc<TransportError> {
        Arc::new(TransportError::Other("refused".to_string()))
    }

    #[test]
    fn test_request_creates_queued_record() {
        let (state, id) = requested(1024);

        let record = state.record(id).unwrap();
        assert_eq!(record.status, UploadStatus::Queued);
        assert!(!record.is_uploading);
        assert_eq!(record.progress, 0.0);
        assert_eq!(record.loaded, 0);
        assert_eq!(record.total, 1024);
        assert!(record.data.is_none() && record.error.is_none());
        assert_eq!(state.queue(), &[id]);
        assert!(state.is_uploading());
    }

    #[test]
    fn test_duplicate_request_rejected() {
        let (mut state, id) = requested(10);

        let err = state.apply(Event::Request { id, size: 99 }).unwrap_err();

        assert_eq!(err, StateError::Duplicate(id));
        assert_eq!(state.record(id).unwrap().total, 10);
        assert_eq!(state.queue().len(), 1);
    }

    #[test]
    fn test_full_lifecycle_to_complete() {
        let (mut state, id) = requested(200);

        state.apply(Event::Start { id }).unwrap();
        assert!(state.record(id).unwrap().is_uploading);
        assert_eq!(state.active_count(), 1);

        state
            .apply(Event::Progress {
                id,
                loaded: 50,
                total: 200,
            })
            .unwrap();
        let record = state.record(id).unwrap();
        assert_eq!(record.progress, 0.25);
        assert!(record.is_uploading);

        state
            .apply(Event::Complete {
                id,
                data: Value::from("ok"),
            })
            .unwrap();
        let record = state.record(id).unwrap();
        assert_eq!(record.status, UploadStatus::Complete);
        assert!(!record.is_uploading);
        assert_eq!(record.progress, 1.0);
        assert_eq!(record.loaded, 200);
        assert_eq!(record.data, Some(Value::from("ok")));
        assert!(record.error.is_none());
        assert!(state.queue().is_empty());
        assert!(!state.is_uploading());
    }

    #[test]
    fn test_error_leaves_data_absent() {
        let (mut state, id) = requested(200);
        state.apply(Event::Start { id }).unwrap();

        state
            .apply(Event::Error {
                id,
                error: failure(),
            })
            .unwrap();

        let record = state.record(id).unwrap();
        assert_eq!(record.status, UploadStatus::Errored);
        assert!(!record.is_uploading);
        assert!(record.data.is_none());
        assert!(record.error.is_some());
        assert!(!state.is_uploading());
    }

    #[test]
    fn test_terminal_record_is_frozen() {
        let (mut state, id) = requested(8);
        state.apply(Event::Start { id }).unwrap();
        state
            .apply(Event::Complete {
                id,
                data: Value::from(1),
            })
            .unwrap();
        let before = format!("{:?}", state.record(id).unwrap());

        let late = [
            Event::Start { id },
            Event::Progress {
                id,
                loaded: 1,
                total: 8,
            },
            Event::Complete {
                id,
                data: Value::from(2),
            },
            Event::Error {
                id,
                error: failure(),
            },
        ];
        for event in late {
            let err = state.apply(event).unwrap_err();
            assert!(matches!(
                err,
                StateError::InvalidTransition {
                    status: UploadStatus::Complete,
                    ..
                }
            ));
        }

        assert_eq!(format!("{:?}", state.record(id).unwrap()), before);
        assert!(!state.is_uploading());
    }

    #[test]
    fn test_progress_requires_start() {
        let (mut state, id) = requested(8);

        let err = state
            .apply(Event::Progress {
                id,
                loaded: 4,
                total: 8,
            })
            .unwrap_err();

        assert_eq!(
            err,
            StateError::InvalidTransition {
                id,
                event: "progress",
                status: UploadStatus::Queued,
            }
        );
    }

    #[test]
    fn test_unknown_id() {
        let mut state = UploadState::new();
        let id = UploadId::new();

        assert_eq!(
            state.apply(Event::Start { id }),
            Err(StateError::Unknown(id))
        );
    }

    #[test]
    fn test_zero_byte_progress_is_not_nan() {
        let (mut state, id) = requested(0);
        state.apply(Event::Start { id }).unwrap();

        state
            .apply(Event::Progress {
                id,
                loaded: 0,
                total: 0,
            })
            .unwrap();
        assert_eq!(state.record(id).unwrap().progress, 0.0);

        state
            .apply(Event::Complete {
                id,
                data: Value::Null,
            })
            .unwrap();
        assert_eq!(state.record(id).unwrap().progress, 1.0);
    }

    #[test]
    fn test_pending_follows_submission_order() {
        let mut state = UploadState::new();
        let ids = (0..4).map(|_| UploadId::new()).collect::<Vec<_>>();
        for id in &ids {
            state.apply(Event::Request { id: *id, size: 1 }).unwrap();
        }

        state.apply(Event::Start { id: ids[1] }).unwrap();
        state
            .apply(Event::Error {
                id: ids[1],
                error: failure(),
            })
            .unwrap();
        state.apply(Event::Start { id: ids[0] }).unwrap();

        assert_eq!(state.pending().collect::<Vec<_>>(), vec![ids[2], ids[3]]);
        assert_eq!(state.active_count(), 1);
        assert_eq!(state.queue(), &[ids[0], ids[2], ids[3]]);
    }

    #[test]
    fn test_overall_flag_stays_false_after_everything_settles() {
        let mut state = UploadState::new();
        let a = UploadId::new();
        let b = UploadId::new();
        state.apply(Event::Request { id: a, size: 1 }).unwrap();
        state.apply(Event::Request { id: b, size: 1 }).unwrap();

        for id in [a, b] {
            state.apply(Event::Start { id }).unwrap();
        }
        state
            .apply(Event::Complete {
                id: a,
                data: Value::Null,
            })
            .unwrap();
        assert!(state.is_uploading());
        state
            .apply(Event::Error {
                id: b,
                error: failure(),
            })
            .unwrap();
        assert!(!state.is_uploading());

        let _ = state.apply(Event::Start { id: a });
        assert!(!state.is_uploading());
        assert!(!state.snapshot().is_uploading);
    }
}
