//! Merged, steppable multi-unit position history.

use dispatch_core::{
    Coordinate, DispatchError, DispatchResult, EpochMillis, PositionSample, UnitId, UnitStatus,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Ordered position history of one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trail {
    pub unit_id: UnitId,
    pub label: String,
    samples: Vec<PositionSample>,
}

impl Trail {
    pub fn empty(unit_id: UnitId, label: impl Into<String>) -> Self {
        Self {
            unit_id,
            label: label.into(),
            samples: Vec::new(),
        }
    }

    /// Builds a trail from samples in any order. Samples sharing a timestamp
    /// collapse to the last one supplied.
    pub fn new(
        unit_id: UnitId,
        label: impl Into<String>,
        samples: Vec<PositionSample>,
    ) -> DispatchResult<Self> {
        for sample in &samples {
            if sample.unit_id != unit_id {
                return Err(DispatchError::validation(format!(
                    "sample for unit {} supplied in trail of unit {unit_id}",
                    sample.unit_id
                )));
            }
            sample.position.validate()?;
        }
        let mut samples = samples;
        sort_collapsing_duplicates(&mut samples);
        Ok(Self {
            unit_id,
            label: label.into(),
            samples,
        })
    }

    /// Folds `other` into this trail. Both are already validated, so on a
    /// shared timestamp the sample from `other` wins.
    fn absorb(&mut self, other: Trail) {
        self.samples.extend(other.samples);
        sort_collapsing_duplicates(&mut self.samples);
    }

    pub fn samples(&self) -> &[PositionSample] {
        &self.samples
    }

    pub fn last(&self) -> Option<&PositionSample> {
        self.samples.last()
    }

    /// Appends a sample strictly newer than the current tail.
    pub fn push(&mut self, sample: PositionSample) -> DispatchResult<()> {
        if sample.unit_id != self.unit_id {
            return Err(DispatchError::validation(format!(
                "sample for unit {} pushed to trail of unit {}",
                sample.unit_id, self.unit_id
            )));
        }
        if let Some(last) = self.samples.last() {
            if sample.timestamp_ms <= last.timestamp_ms {
                return Err(DispatchError::stale(format!(
                    "sample at {} is not newer than {} for unit {}",
                    sample.timestamp_ms, last.timestamp_ms, self.unit_id
                )));
            }
        }
        self.samples.push(sample);
        Ok(())
    }

    /// Drops the oldest samples beyond `max_len`.
    pub fn truncate_front(&mut self, max_len: usize) {
        if self.samples.len() > max_len {
            let excess = self.samples.len() - max_len;
            self.samples.drain(..excess);
        }
    }

    pub fn up_to(&self, timestamp_ms: EpochMillis) -> &[PositionSample] {
        let end = self
            .samples
            .partition_point(|sample| sample.timestamp_ms <= timestamp_ms);
        &self.samples[..end]
    }

    pub fn at(&self, timestamp_ms: EpochMillis) -> Option<&PositionSample> {
        self.samples
            .binary_search_by_key(&timestamp_ms, |sample| sample.timestamp_ms)
            .ok()
            .map(|index| &self.samples[index])
    }
}

/// Stable sort by timestamp, keeping the last of each run of equal
/// timestamps.
fn sort_collapsing_duplicates(samples: &mut Vec<PositionSample>) {
    samples.sort_by_key(|sample| sample.timestamp_ms);
    samples.reverse();
    samples.dedup_by_key(|sample| sample.timestamp_ms);
    samples.reverse();
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Breadcrumb {
    pub position: Coordinate,
    pub timestamp_ms: EpochMillis,
    pub status: UnitStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitFrame {
    pub unit_id: UnitId,
    pub label: String,
    /// Present only when the unit reported exactly at the frame timestamp.
    pub marker: Option<PositionSample>,
    pub polyline: Vec<Coordinate>,
    pub breadcrumbs: Vec<Breadcrumb>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameState {
    pub index: Option<usize>,
    pub timestamp_ms: Option<EpochMillis>,
    pub total_frames: usize,
    pub units: Vec<UnitFrame>,
}

impl FrameState {
    pub fn empty() -> Self {
        Self {
            index: None,
            timestamp_ms: None,
            total_frames: 0,
            units: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayTimeline {
    trails: BTreeMap<UnitId, Trail>,
    timestamps: Vec<EpochMillis>,
}

impl ReplayTimeline {
    /// Trails for the same unit are merged; distinct timestamps across all
    /// units become the frames of the timeline.
    pub fn new(trails: impl IntoIterator<Item = Trail>) -> Self {
        let mut merged: BTreeMap<UnitId, Trail> = BTreeMap::new();
        for trail in trails {
            match merged.get_mut(&trail.unit_id) {
                Some(existing) => existing.absorb(trail),
                None => {
                    merged.insert(trail.unit_id, trail);
                }
            }
        }

        let mut timestamps: Vec<EpochMillis> = merged
            .values()
            .flat_map(|trail| trail.samples.iter().map(|sample| sample.timestamp_ms))
            .collect();
        timestamps.sort_unstable();
        timestamps.dedup();

        Self {
            trails: merged,
            timestamps,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[EpochMillis] {
        &self.timestamps
    }

    pub fn timestamp(&self, index: usize) -> Option<EpochMillis> {
        self.timestamps.get(index).copied()
    }

    pub fn trails(&self) -> impl Iterator<Item = &Trail> {
        self.trails.values()
    }

    /// Span between the first and last frame.
    pub fn duration_ms(&self) -> u64 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        }
    }

    /// Frame for the `index`-th timestamp. An empty timeline yields an empty
    /// frame for any index; past-the-end indexes are rejected otherwise.
    pub fn step_to(&self, index: usize) -> DispatchResult<FrameState> {
        if self.timestamps.is_empty() {
            return Ok(FrameState::empty());
        }
        let Some(timestamp_ms) = self.timestamp(index) else {
            return Err(DispatchError::validation(format!(
                "frame {index} out of range, timeline has {} frames",
                self.timestamps.len()
            )));
        };

        let units = self
            .trails
            .values()
            .map(|trail| {
                let visible = trail.up_to(timestamp_ms);
                UnitFrame {
                    unit_id: trail.unit_id,
                    label: trail.label.clone(),
                    marker: trail.at(timestamp_ms).copied(),
                    polyline: visible.iter().map(|sample| sample.position).collect(),
                    breadcrumbs: visible
                        .iter()
                        .map(|sample| Breadcrumb {
                            position: sample.position,
                            timestamp_ms: sample.timestamp_ms,
                            status: sample.status,
                        })
                        .collect(),
                }
            })
            .collect();

        Ok(FrameState {
            index: Some(index),
            timestamp_ms: Some(timestamp_ms),
            total_frames: self.timestamps.len(),
            units,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample;
    use dispatch_core::ErrorCode;

    fn two_unit_timeline() -> (ReplayTimeline, UnitId, UnitId) {
        let a = UnitId::new();
        let b = UnitId::new();
        let trail_a = Trail::new(
            a,
            "P-1",
            vec![
                sample(a, 300, 40.02, -74.0),
                sample(a, 100, 40.00, -74.0),
                sample(a, 200, 40.01, -74.0),
            ],
        )
        .unwrap();
        let trail_b = Trail::new(
            b,
            "E-7",
            vec![sample(b, 200, 41.00, -73.0), sample(b, 400, 41.01, -73.0)],
        )
        .unwrap();
        (ReplayTimeline::new([trail_a, trail_b]), a, b)
    }

    fn frame_for(frame: &FrameState, unit_id: UnitId) -> &UnitFrame {
        frame
            .units
            .iter()
            .find(|unit| unit.unit_id == unit_id)
            .unwrap()
    }

    #[test]
    fn timestamps_are_distinct_and_sorted() {
        let (timeline, _, _) = two_unit_timeline();
        assert_eq!(timeline.timestamps(), &[100, 200, 300, 400]);
        assert_eq!(timeline.duration_ms(), 300);
    }

    #[test]
    fn frame_contents_follow_the_requested_timestamp() {
        let (timeline, a, b) = two_unit_timeline();

        let frame = timeline.step_to(0).unwrap();
        assert_eq!(frame.timestamp_ms, Some(100));
        let unit_a = frame_for(&frame, a);
        assert_eq!(unit_a.marker.unwrap().timestamp_ms, 100);
        assert_eq!(unit_a.polyline.len(), 1);
        let unit_b = frame_for(&frame, b);
        assert!(unit_b.marker.is_none());
        assert!(unit_b.polyline.is_empty());
        assert!(unit_b.breadcrumbs.is_empty());

        let frame = timeline.step_to(3).unwrap();
        let unit_a = frame_for(&frame, a);
        assert!(unit_a.marker.is_none());
        assert_eq!(unit_a.polyline.len(), 3);
        assert_eq!(unit_a.breadcrumbs.len(), 3);
        assert_eq!(unit_a.breadcrumbs[2].timestamp_ms, 300);
        let unit_b = frame_for(&frame, b);
        assert_eq!(unit_b.marker.unwrap().position, Coordinate::new(41.01, -73.0));
        assert_eq!(unit_b.polyline.len(), 2);
    }

    #[test]
    fn step_to_is_pure() {
        let (timeline, _, _) = two_unit_timeline();
        let first = timeline.step_to(2).unwrap();
        let _ = timeline.step_to(0).unwrap();
        let second = timeline.step_to(2).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_timeline_yields_empty_frame() {
        let timeline = ReplayTimeline::new(Vec::new());
        assert!(timeline.is_empty());
        let frame = timeline.step_to(0).unwrap();
        assert!(frame.is_empty());
        assert_eq!(timeline.step_to(17).unwrap(), FrameState::empty());

        let idle = ReplayTimeline::new([Trail::empty(UnitId::new(), "P-9")]);
        assert!(idle.step_to(0).unwrap().is_empty());
    }

    #[test]
    fn past_the_end_is_rejected() {
        let (timeline, _, _) = two_unit_timeline();
        let err = timeline.step_to(4).unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[test]
    fn duplicate_timestamps_keep_last_sample() {
        let a = UnitId::new();
        let trail = Trail::new(
            a,
            "P-1",
            vec![sample(a, 100, 40.0, -74.0), sample(a, 100, 40.5, -74.0)],
        )
        .unwrap();
        assert_eq!(trail.samples().len(), 1);
        assert_eq!(trail.samples()[0].position.latitude, 40.5);
    }

    #[test]
    fn trail_rejects_foreign_and_invalid_samples() {
        let a = UnitId::new();
        let b = UnitId::new();
        let err = Trail::new(a, "P-1", vec![sample(b, 1, 40.0, -74.0)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        let err = Trail::new(a, "P-1", vec![sample(a, 1, 140.0, -74.0)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[test]
    fn trail_push_is_append_only() {
        let a = UnitId::new();
        let mut trail = Trail::empty(a, "P-1");
        trail.push(sample(a, 10, 40.0, -74.0)).unwrap();
        let err = trail.push(sample(a, 10, 40.1, -74.0)).unwrap_err();
        assert_eq!(err.code, ErrorCode::StaleData);
        trail.push(sample(a, 20, 40.1, -74.0)).unwrap();
        trail.truncate_front(1);
        assert_eq!(trail.samples()[0].timestamp_ms, 20);
    }

    #[test]
    fn merging_trails_for_the_same_unit() {
        let a = UnitId::new();
        let first = Trail::new(a, "P-1", vec![sample(a, 10, 40.0, -74.0)]).unwrap();
        let second = Trail::new(a, "P-1", vec![sample(a, 5, 40.1, -74.0)]).unwrap();
        let timeline = ReplayTimeline::new([first, second]);
        assert_eq!(timeline.trails().count(), 1);
        assert_eq!(timeline.timestamps(), &[5, 10]);
    }

    #[test]
    fn merging_overlapping_trails_keeps_every_timestamp() {
        let a = UnitId::new();
        let first = Trail::new(
            a,
            "E-2",
            vec![sample(a, 10, 40.0, -74.0), sample(a, 20, 40.1, -74.0)],
        )
        .unwrap();
        let second = Trail::new(
            a,
            "E-2 relief",
            vec![sample(a, 20, 40.5, -74.0), sample(a, 30, 40.2, -74.0)],
        )
        .unwrap();
        let timeline = ReplayTimeline::new([first, second]);

        let trail = timeline.trails().next().unwrap();
        assert_eq!(trail.label, "E-2");
        let stamps: Vec<u64> = trail.samples().iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(stamps, vec![10, 20, 30]);
        assert_eq!(trail.at(20).unwrap().position.latitude, 40.5);
    }
}
