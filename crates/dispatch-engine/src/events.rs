use dispatch_core::{DispatchEvent, IncidentId, UnitId};
use std::collections::VecDeque;

const DEFAULT_CAPACITY: usize = 50_000;

/// Activity log kept alongside the board. Once `capacity` entries are held,
/// recording a new one drops the oldest.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<DispatchEvent>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the cap, dropping the oldest entries if the log is over it.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.trim();
    }

    fn trim(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn record(&mut self, event: DispatchEvent) {
        tracing::debug!(
            kind = ?event.kind,
            incident_id = ?event.incident_id,
            unit_id = ?event.unit_id,
            "{}",
            event.message
        );
        self.entries.push_back(event);
        self.trim();
    }

    pub fn iter(&self) -> impl Iterator<Item = &DispatchEvent> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Events touching one incident, oldest first. Entries recorded with the
    /// same timestamp keep their recording order.
    pub fn timeline(&self, incident_id: IncidentId) -> Vec<DispatchEvent> {
        let mut events: Vec<DispatchEvent> = self
            .entries
            .iter()
            .filter(|event| event.incident_id == Some(incident_id))
            .cloned()
            .collect();
        events.sort_by_key(|event| event.at_ms);
        events
    }

    pub fn for_unit(&self, unit_id: UnitId) -> Vec<DispatchEvent> {
        self.entries
            .iter()
            .filter(|event| event.unit_id == Some(unit_id))
            .cloned()
            .collect()
    }
}
