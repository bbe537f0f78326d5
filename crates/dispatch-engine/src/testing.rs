use dispatch_core::{
    Coordinate, Incident, IncidentCategory, PositionSample, Priority, Unit, UnitCategory, UnitId,
    UnitStatus,
};

pub fn unit_at(call_sign: &str, category: UnitCategory, latitude: f64, longitude: f64) -> Unit {
    Unit::new(call_sign, category, Coordinate::new(latitude, longitude))
}

pub fn incident_at(latitude: f64, longitude: f64, priority: u8) -> Incident {
    Incident::new(
        "INC-TEST",
        IncidentCategory::Other,
        Priority::new(priority).expect("test priority in range"),
        Coordinate::new(latitude, longitude),
        "test incident",
        0,
    )
}

pub fn sample(unit_id: UnitId, timestamp_ms: u64, latitude: f64, longitude: f64) -> PositionSample {
    PositionSample {
        unit_id,
        position: Coordinate::new(latitude, longitude),
        timestamp_ms,
        status: UnitStatus::EnRoute,
    }
}
