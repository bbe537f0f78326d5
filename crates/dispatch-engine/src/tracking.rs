use crate::board::DispatchBoard;
use crate::replay::{ReplayTimeline, Trail};
use dispatch_core::{
    DispatchError, DispatchEvent, DispatchResult, EpochMillis, EventKind, PositionSample, UnitId,
};
use dispatch_observability::names;
use std::collections::HashMap;

/// Ingests live position samples and keeps each unit's trail.
///
/// Samples for one unit must arrive with strictly increasing timestamps; a
/// late or duplicate sample is refused and leaves the trail untouched.
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    trails: HashMap<UnitId, Trail>,
    retention: Option<usize>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps every trail at `max_samples`, dropping the oldest first.
    pub fn with_retention(max_samples: usize) -> Self {
        Self {
            trails: HashMap::new(),
            retention: Some(max_samples.max(1)),
        }
    }

    pub fn last_seen(&self, unit_id: UnitId) -> Option<EpochMillis> {
        self.trails
            .get(&unit_id)
            .and_then(|trail| trail.last())
            .map(|sample| sample.timestamp_ms)
    }

    pub fn trail(&self, unit_id: UnitId) -> Option<&Trail> {
        self.trails.get(&unit_id)
    }

    pub fn ingest(&mut self, sample: PositionSample, label: &str) -> DispatchResult<()> {
        sample.position.validate()?;
        let trail = self
            .trails
            .entry(sample.unit_id)
            .or_insert_with(|| Trail::empty(sample.unit_id, label));
        if let Err(err) = trail.push(sample) {
            metrics::counter!(names::POSITION_SAMPLES_REJECTED).increment(1);
            tracing::warn!(unit_id = %sample.unit_id, error = %err, "position sample rejected");
            return Err(err);
        }
        if let Some(max) = self.retention {
            trail.truncate_front(max);
        }
        Ok(())
    }

    /// Ingests `sample` and moves the unit on the board. The unit must be
    /// known to the board; its status is not touched. A sample no newer than
    /// the board's own position fix is stale even if the trail is empty.
    pub fn apply(
        &mut self,
        board: &mut DispatchBoard,
        sample: PositionSample,
    ) -> DispatchResult<()> {
        let unit = board.require_unit(sample.unit_id)?;
        let label = unit.call_sign.clone();
        if let Some(known_at) = unit
            .position_at_ms
            .filter(|known_at| sample.timestamp_ms <= *known_at)
        {
            let err = DispatchError::stale(format!(
                "sample at {} is not newer than position of {label} at {known_at}",
                sample.timestamp_ms
            ));
            metrics::counter!(names::POSITION_SAMPLES_REJECTED).increment(1);
            tracing::warn!(unit_id = %sample.unit_id, error = %err, "position sample rejected");
            return Err(err);
        }
        self.ingest(sample, &label)?;

        let unit = board.unit_mut(sample.unit_id)?;
        unit.position = sample.position;
        unit.position_at_ms = Some(sample.timestamp_ms);
        let incident_id = unit.assigned_incident;

        let mut event = DispatchEvent::new(
            EventKind::UnitLocationUpdated,
            sample.timestamp_ms,
            format!("{label} reported position"),
        )
        .for_unit(sample.unit_id)
        .with_detail("latitude", sample.position.latitude)
        .with_detail("longitude", sample.position.longitude);
        if let Some(incident_id) = incident_id {
            event = event.for_incident(incident_id);
        }
        board.record(event);
        Ok(())
    }

    /// Snapshot of every trail as a replay timeline.
    pub fn timeline(&self) -> ReplayTimeline {
        ReplayTimeline::new(self.trails.values().cloned())
    }

    pub fn forget(&mut self, unit_id: UnitId) -> DispatchResult<Trail> {
        self.trails
            .remove(&unit_id)
            .ok_or_else(|| DispatchError::not_found(format!("no trail for unit {unit_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample, unit_at};
    use dispatch_core::{Coordinate, ErrorCode, UnitCategory};

    #[test]
    fn stale_and_duplicate_samples_are_refused() {
        let unit = UnitId::new();
        let mut tracker = PositionTracker::new();
        tracker.ingest(sample(unit, 100, 40.0, -74.0), "P-1").unwrap();

        let err = tracker.ingest(sample(unit, 100, 40.1, -74.0), "P-1").unwrap_err();
        assert_eq!(err.code, ErrorCode::StaleData);
        let err = tracker.ingest(sample(unit, 50, 40.1, -74.0), "P-1").unwrap_err();
        assert_eq!(err.code, ErrorCode::StaleData);

        tracker.ingest(sample(unit, 150, 40.1, -74.0), "P-1").unwrap();
        assert_eq!(tracker.last_seen(unit), Some(150));
        assert_eq!(tracker.trail(unit).unwrap().samples().len(), 2);
    }

    #[test]
    fn units_are_tracked_independently() {
        let a = UnitId::new();
        let b = UnitId::new();
        let mut tracker = PositionTracker::new();
        tracker.ingest(sample(a, 500, 40.0, -74.0), "A").unwrap();
        tracker.ingest(sample(b, 100, 41.0, -74.0), "B").unwrap();

        let timeline = tracker.timeline();
        assert_eq!(timeline.timestamps(), &[100, 500]);
        assert_eq!(timeline.trails().count(), 2);
    }

    #[test]
    fn invalid_position_is_a_validation_error() {
        let mut tracker = PositionTracker::new();
        let err = tracker
            .ingest(sample(UnitId::new(), 1, 0.0, 200.0), "P-1")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[test]
    fn retention_drops_oldest() {
        let unit = UnitId::new();
        let mut tracker = PositionTracker::with_retention(2);
        for step in 1..=4 {
            tracker.ingest(sample(unit, step, 40.0, -74.0), "P-1").unwrap();
        }
        let kept: Vec<u64> = tracker
            .trail(unit)
            .unwrap()
            .samples()
            .iter()
            .map(|sample| sample.timestamp_ms)
            .collect();
        assert_eq!(kept, vec![3, 4]);
    }

    #[test]
    fn apply_moves_unit_and_logs() {
        let mut board = DispatchBoard::new();
        let unit = unit_at("M-3", UnitCategory::Ems, 40.0, -74.0);
        let unit_id = unit.id;
        board.upsert_unit(unit);

        let mut tracker = PositionTracker::new();
        tracker.apply(&mut board, sample(unit_id, 10, 40.5, -74.5)).unwrap();

        let moved = board.unit(unit_id).unwrap();
        assert_eq!(moved.position, Coordinate::new(40.5, -74.5));
        assert_eq!(moved.position_at_ms, Some(10));
        assert_eq!(board.events().for_unit(unit_id).len(), 1);

        let err = tracker
            .apply(&mut board, sample(unit_id, 5, 40.6, -74.5))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::StaleData);
        assert_eq!(board.unit(unit_id).unwrap().position_at_ms, Some(10));

        let err = tracker
            .apply(&mut board, sample(UnitId::new(), 20, 40.0, -74.0))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn board_fix_newer_than_sample_wins() {
        let mut board = DispatchBoard::new();
        let mut unit = unit_at("E-7", UnitCategory::Fire, 40.0, -74.0);
        unit.position_at_ms = Some(1_000);
        let unit_id = unit.id;
        board.upsert_unit(unit);

        let mut tracker = PositionTracker::new();
        for stale_at in [500, 1_000] {
            let err = tracker
                .apply(&mut board, sample(unit_id, stale_at, 40.1, -74.0))
                .unwrap_err();
            assert_eq!(err.code, ErrorCode::StaleData);
        }
        assert!(tracker.trail(unit_id).is_none());
        let kept = board.unit(unit_id).unwrap();
        assert_eq!(kept.position, Coordinate::new(40.0, -74.0));
        assert_eq!(kept.position_at_ms, Some(1_000));

        tracker.apply(&mut board, sample(unit_id, 1_001, 40.1, -74.0)).unwrap();
        assert_eq!(board.unit(unit_id).unwrap().position_at_ms, Some(1_001));
    }
}
