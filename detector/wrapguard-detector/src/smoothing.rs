use std::collections::VecDeque;

/// Ring buffer of the last N raw in-ROI booleans (§4.3.4). When temporal
/// smoothing is enabled, `personInRoi` only flips to true once enough of
/// the recent raw detections agree — this damps single-frame false
/// positives from a flickering pose estimate.
pub struct TemporalSmoother {
    history: VecDeque<bool>,
    capacity: usize,
    min_detections: usize,
    enabled: bool,
}

impl TemporalSmoother {
    pub fn new(capacity: usize, min_detections: usize, enabled: bool) -> Self {
        TemporalSmoother {
            history: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            min_detections,
            enabled,
        }
    }

    /// Pushes the latest raw detection and returns the smoothed value.
    pub fn push(&mut self, raw: bool) -> bool {
        if !self.enabled {
            return raw;
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(raw);
        self.history.iter().filter(|&&v| v).count() >= self.min_detections
    }
}
