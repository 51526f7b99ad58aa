/// Bytes sent so far out of the bytes to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub loaded: u64,
    pub total: u64,
}

impl Progress {
    pub fn new(loaded: u64, total: u64) -> Self {
        Self { loaded, total }
    }

    /// `loaded / total` capped at 1.0; 0.0 for an empty payload instead of NaN.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.loaded as f64 / self.total as f64).min(1.0)
    }
}

/// Folds per-part byte counters into one figure for the owning request.
///
/// Each part reports an absolute `loaded` count which overwrites its slot, so
/// the sum only grows while every transport reports non-decreasing counts. A
/// transport that goes backwards is reflected as-is.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    slots: Vec<u64>,
    total: u64,
}

impl ProgressAggregator {
    pub fn new(parts: usize, total: u64) -> Self {
        Self {
            slots: vec![0; parts],
            total,
        }
    }

    /// Stores `loaded` for part `index` and returns the new aggregate.
    /// Indices outside the plan are ignored.
    pub fn record(&mut self, index: usize, loaded: u64) -> Progress {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = loaded;
        }
        self.current()
    }

    pub fn current(&self) -> Progress {
        Progress::new(self.slots.iter().sum(), self.total)
    }
}
