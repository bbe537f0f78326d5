//! Incident and assignment state machines.
//!
//! Incidents move `new -> dispatched -> en_route -> on_scene -> resolved`, may
//! be cancelled from any non-terminal state, and never move backwards.
//! Assignments move `dispatched -> en_route -> on_scene -> cleared` and may be
//! cancelled while active. Unit status reports are the only driver of the
//! middle of both progressions.

use crate::board::DispatchBoard;
use dispatch_core::{
    Assignment, AssignmentId, AssignmentStatus, DispatchError, DispatchEvent, DispatchResult,
    EpochMillis, ErrorCode, EventKind, Incident, IncidentId, IncidentNote, IncidentStatus, Unit,
    UnitId, UnitStatus,
};
use serde::{Deserialize, Serialize};
use tracing::info;

pub fn can_transition(from: IncidentStatus, to: IncidentStatus) -> bool {
    use IncidentStatus::*;
    match (from, to) {
        (Resolved | Cancelled, _) => false,
        (_, Cancelled) => true,
        (New, Dispatched) | (Dispatched, EnRoute) | (EnRoute, OnScene) => true,
        (Dispatched | EnRoute | OnScene, Resolved) => true,
        _ => false,
    }
}

/// Applies a single incident transition, stamping `updated_at_ms`.
pub fn transition_incident(
    incident: &mut Incident,
    to: IncidentStatus,
    at: EpochMillis,
) -> DispatchResult<()> {
    check_incident_transition(incident, to)?;
    incident.status = to;
    incident.updated_at_ms = at;
    if to == IncidentStatus::Resolved {
        incident.resolved_at_ms = Some(at);
    }
    Ok(())
}

pub(crate) fn check_incident_transition(
    incident: &Incident,
    to: IncidentStatus,
) -> DispatchResult<()> {
    if can_transition(incident.status, to) {
        return Ok(());
    }
    Err(DispatchError::invalid_state(format!(
        "incident {} cannot move from {} to {}",
        incident.number, incident.status, to
    )))
}

/// Walks the incident forward one step at a time until it reaches `target`.
/// Incidents already at or past the target are left alone.
pub(crate) fn advance_incident(
    incident: &mut Incident,
    target: IncidentStatus,
    at: EpochMillis,
) -> DispatchResult<()> {
    while incident.status.progress() < target.progress() {
        let next = match incident.status {
            IncidentStatus::New => IncidentStatus::Dispatched,
            IncidentStatus::Dispatched => IncidentStatus::EnRoute,
            IncidentStatus::EnRoute => IncidentStatus::OnScene,
            _ => break,
        };
        transition_incident(incident, next, at)?;
    }
    Ok(())
}

pub fn can_transition_assignment(from: AssignmentStatus, to: AssignmentStatus) -> bool {
    use AssignmentStatus::*;
    match (from, to) {
        (Cleared | Cancelled, _) => false,
        (_, Cancelled | Cleared) => true,
        (Dispatched, EnRoute | OnScene) | (EnRoute, OnScene) => true,
        _ => false,
    }
}

pub(crate) fn transition_assignment(
    assignment: &mut Assignment,
    to: AssignmentStatus,
    at: EpochMillis,
) -> DispatchResult<()> {
    if !can_transition_assignment(assignment.status, to) {
        return Err(DispatchError::invalid_state(format!(
            "assignment {} cannot move from {} to {}",
            assignment.id, assignment.status, to
        )));
    }
    assignment.status = to;
    let stamp = match to {
        AssignmentStatus::Dispatched => return Ok(()),
        AssignmentStatus::EnRoute => &mut assignment.en_route_at_ms,
        AssignmentStatus::OnScene => &mut assignment.on_scene_at_ms,
        AssignmentStatus::Cleared => &mut assignment.cleared_at_ms,
        AssignmentStatus::Cancelled => &mut assignment.cancelled_at_ms,
    };
    stamp.get_or_insert(at);
    Ok(())
}

/// Puts a unit back in service after its assignment ended.
pub(crate) fn release_unit(unit: &mut Unit) {
    unit.status = UnitStatus::Available;
    unit.assigned_incident = None;
}

/// Routes a unit status report to the unit and its active assignment, and
/// advances the assignment's incident accordingly.
///
/// `en_route`/`on_scene` require an active assignment and may not move it
/// backwards; `available` clears any active assignment; `offline` is refused
/// while the unit still holds an assignment.
pub fn apply_unit_status(
    board: &mut DispatchBoard,
    unit_id: UnitId,
    status: UnitStatus,
    at: EpochMillis,
) -> DispatchResult<Unit> {
    let previous = board.require_unit(unit_id)?.status;
    let active = board.active_assignment_for_unit(unit_id).cloned();
    let related_incident = active.as_ref().map(|assignment| assignment.incident_id);

    match (status, active) {
        (UnitStatus::EnRoute | UnitStatus::OnScene, None) => {
            return Err(DispatchError::invalid_state(format!(
                "unit {unit_id} has no active assignment to report {status} against"
            )));
        }
        (UnitStatus::EnRoute | UnitStatus::OnScene, Some(assignment)) => {
            let target = if status == UnitStatus::EnRoute {
                AssignmentStatus::EnRoute
            } else {
                AssignmentStatus::OnScene
            };
            let incident_target = if status == UnitStatus::EnRoute {
                IncidentStatus::EnRoute
            } else {
                IncidentStatus::OnScene
            };
            if assignment.status != target {
                if !can_transition_assignment(assignment.status, target) {
                    return Err(DispatchError::invalid_state(format!(
                        "assignment {} cannot move from {} to {}",
                        assignment.id, assignment.status, target
                    )));
                }
                let incident = board.require_incident(assignment.incident_id)?;
                if incident.status.is_terminal() {
                    return Err(DispatchError::invalid_state(format!(
                        "incident {} is {}",
                        incident.number, incident.status
                    )));
                }
                transition_assignment(board.assignment_mut(assignment.id)?, target, at)?;
                let incident = board.incident_mut(assignment.incident_id)?;
                advance_incident(incident, incident_target, at)?;
            }
            board.unit_mut(unit_id)?.status = status;
        }
        (UnitStatus::Available, Some(assignment)) => {
            transition_assignment(
                board.assignment_mut(assignment.id)?,
                AssignmentStatus::Cleared,
                at,
            )?;
            release_unit(board.unit_mut(unit_id)?);
        }
        (UnitStatus::Available, None) => {
            board.unit_mut(unit_id)?.status = UnitStatus::Available;
        }
        (UnitStatus::Offline, Some(assignment)) => {
            return Err(DispatchError::invalid_state(format!(
                "unit {unit_id} still holds assignment {}; clear it before going offline",
                assignment.id
            )));
        }
        (UnitStatus::Offline, None) => {
            board.unit_mut(unit_id)?.status = UnitStatus::Offline;
        }
    }

    let unit = board.require_unit(unit_id)?.clone();
    info!(unit_id = %unit_id, from = %previous, to = %status, "unit status changed");
    let mut event = DispatchEvent::new(
        EventKind::UnitStatusChanged,
        at,
        format!("Unit {} status changed from {previous} to {status}", unit.call_sign),
    )
    .for_unit(unit_id)
    .with_detail("old_status", previous)
    .with_detail("new_status", status);
    if let Some(incident_id) = related_incident {
        event = event.for_incident(incident_id);
    }
    board.record(event);
    Ok(unit)
}

/// Cancels an incident from any non-terminal state. Units still working it
/// are released and their assignments cancelled.
pub fn cancel_incident(
    board: &mut DispatchBoard,
    incident_id: IncidentId,
    reason: &str,
    at: EpochMillis,
) -> DispatchResult<Incident> {
    let incident = board.require_incident(incident_id)?;
    check_incident_transition(incident, IncidentStatus::Cancelled)?;
    let number = incident.number.clone();
    let active: Vec<(AssignmentId, UnitId)> = board
        .active_assignments_for_incident(incident_id)
        .into_iter()
        .map(|assignment| (assignment.id, assignment.unit_id))
        .collect();
    for (_, unit_id) in &active {
        board.require_unit(*unit_id)?;
    }

    for (assignment_id, unit_id) in &active {
        transition_assignment(
            board.assignment_mut(*assignment_id)?,
            AssignmentStatus::Cancelled,
            at,
        )?;
        release_unit(board.unit_mut(*unit_id)?);
    }
    let incident = board.incident_mut(incident_id)?;
    transition_incident(incident, IncidentStatus::Cancelled, at)?;
    let incident = incident.clone();

    info!(incident = %number, released = active.len(), "incident cancelled");
    let mut event = DispatchEvent::new(
        EventKind::IncidentCancelled,
        at,
        format!("Incident {number} cancelled"),
    )
    .for_incident(incident_id)
    .with_detail("released_units", active.len());
    if !reason.trim().is_empty() {
        event = event.with_detail("reason", reason.trim());
    }
    board.record(event);
    Ok(incident)
}

/// Adds a freshly reported incident to the board. It must start in `new`.
pub fn register_incident(
    board: &mut DispatchBoard,
    incident: Incident,
    at: EpochMillis,
) -> DispatchResult<Incident> {
    incident.position.validate()?;
    if incident.description.trim().is_empty() {
        return Err(DispatchError::validation("incident description is required"));
    }
    if incident.status != IncidentStatus::New {
        return Err(DispatchError::invalid_state(format!(
            "incident {} must be registered as new, not {}",
            incident.number, incident.status
        )));
    }
    if board.incident(incident.id).is_some() {
        return Err(DispatchError::conflict(format!(
            "incident {} already exists",
            incident.id
        )));
    }
    board.record(
        DispatchEvent::new(
            EventKind::IncidentCreated,
            at,
            format!("Incident {} created", incident.number),
        )
        .for_incident(incident.id)
        .with_detail("category", format!("{:?}", incident.category).to_lowercase())
        .with_detail("priority", incident.priority.value()),
    );
    board.upsert_incident(incident.clone());
    Ok(incident)
}

/// Appends an operator note. Notes are accepted in every state, including
/// after resolution.
pub fn add_note(
    board: &mut DispatchBoard,
    incident_id: IncidentId,
    text: &str,
    at: EpochMillis,
) -> DispatchResult<Incident> {
    let text = text.trim();
    if text.is_empty() {
        return Err(DispatchError::validation("note text is required"));
    }
    let incident = board.incident_mut(incident_id)?;
    incident.notes.push(IncidentNote {
        text: text.to_string(),
        added_at_ms: at,
    });
    incident.updated_at_ms = at;
    let incident = incident.clone();
    board.record(
        DispatchEvent::new(
            EventKind::NoteAdded,
            at,
            format!("Note added to incident {}", incident.number),
        )
        .for_incident(incident_id)
        .with_detail("text", text),
    );
    Ok(incident)
}

/// Display-ready result of a lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleOutcome {
    pub success: bool,
    pub status: Option<IncidentStatus>,
    pub failure: Option<ErrorCode>,
    pub reason: Option<String>,
}

impl LifecycleOutcome {
    pub fn from_result(result: &DispatchResult<Incident>) -> Self {
        match result {
            Ok(incident) => Self {
                success: true,
                status: Some(incident.status),
                failure: None,
                reason: None,
            },
            Err(err) => Self {
                success: false,
                status: None,
                failure: Some(err.code),
                reason: Some(err.message.clone()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::commit_assignment;
    use crate::testing::{incident_at, unit_at};
    use dispatch_core::UnitCategory;

    const ALL: [IncidentStatus; 6] = [
        IncidentStatus::New,
        IncidentStatus::Dispatched,
        IncidentStatus::EnRoute,
        IncidentStatus::OnScene,
        IncidentStatus::Resolved,
        IncidentStatus::Cancelled,
    ];

    #[test]
    fn terminal_states_reject_everything() {
        for to in ALL {
            assert!(!can_transition(IncidentStatus::Resolved, to));
            assert!(!can_transition(IncidentStatus::Cancelled, to));
        }
    }

    #[test]
    fn cancellation_reachable_from_every_open_state() {
        for from in &ALL[..4] {
            assert!(can_transition(*from, IncidentStatus::Cancelled));
        }
    }

    #[test]
    fn resolution_requires_dispatch() {
        assert!(!can_transition(IncidentStatus::New, IncidentStatus::Resolved));
        assert!(can_transition(IncidentStatus::Dispatched, IncidentStatus::Resolved));
        assert!(can_transition(IncidentStatus::OnScene, IncidentStatus::Resolved));
    }

    #[test]
    fn no_backwards_moves() {
        assert!(!can_transition(IncidentStatus::OnScene, IncidentStatus::EnRoute));
        assert!(!can_transition(IncidentStatus::EnRoute, IncidentStatus::Dispatched));
        assert!(!can_transition(IncidentStatus::Dispatched, IncidentStatus::New));
    }

    #[test]
    fn transition_on_terminal_incident_is_invalid_state() {
        let mut incident = incident_at(40.0, -74.0, 1);
        incident.status = IncidentStatus::Resolved;
        let err = transition_incident(&mut incident, IncidentStatus::Cancelled, 10).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidState);
    }

    #[test]
    fn unit_reports_drive_incident_forward() {
        let mut board = DispatchBoard::new();
        let unit = unit_at("P-1", UnitCategory::Police, 40.0, -74.0);
        let incident = incident_at(40.01, -74.0, 2);
        let (unit_id, incident_id) = (unit.id, incident.id);
        board.upsert_unit(unit);
        board.upsert_incident(incident);
        let assignment =
            commit_assignment(&mut board, unit_id, incident_id, None, None, 100).unwrap();

        apply_unit_status(&mut board, unit_id, UnitStatus::EnRoute, 200).unwrap();
        assert_eq!(board.incident(incident_id).unwrap().status, IncidentStatus::EnRoute);
        let stored = board.assignment(assignment.id).unwrap();
        assert_eq!(stored.status, AssignmentStatus::EnRoute);
        assert_eq!(stored.en_route_at_ms, Some(200));

        apply_unit_status(&mut board, unit_id, UnitStatus::OnScene, 300).unwrap();
        assert_eq!(board.incident(incident_id).unwrap().status, IncidentStatus::OnScene);
        assert_eq!(board.assignment(assignment.id).unwrap().on_scene_at_ms, Some(300));

        let err = apply_unit_status(&mut board, unit_id, UnitStatus::EnRoute, 400).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidState);
    }

    #[test]
    fn skipping_en_route_still_walks_incident_through_each_state() {
        let mut board = DispatchBoard::new();
        let unit = unit_at("M-4", UnitCategory::Ems, 40.0, -74.0);
        let incident = incident_at(40.01, -74.0, 1);
        let (unit_id, incident_id) = (unit.id, incident.id);
        board.upsert_unit(unit);
        board.upsert_incident(incident);
        commit_assignment(&mut board, unit_id, incident_id, None, None, 100).unwrap();

        apply_unit_status(&mut board, unit_id, UnitStatus::OnScene, 150).unwrap();
        assert_eq!(board.incident(incident_id).unwrap().status, IncidentStatus::OnScene);
    }

    #[test]
    fn available_report_clears_assignment() {
        let mut board = DispatchBoard::new();
        let unit = unit_at("P-2", UnitCategory::Police, 40.0, -74.0);
        let incident = incident_at(40.01, -74.0, 3);
        let (unit_id, incident_id) = (unit.id, incident.id);
        board.upsert_unit(unit);
        board.upsert_incident(incident);
        let assignment =
            commit_assignment(&mut board, unit_id, incident_id, None, None, 100).unwrap();

        let unit = apply_unit_status(&mut board, unit_id, UnitStatus::Available, 500).unwrap();
        assert_eq!(unit.status, UnitStatus::Available);
        assert!(unit.assigned_incident.is_none());
        let stored = board.assignment(assignment.id).unwrap();
        assert_eq!(stored.status, AssignmentStatus::Cleared);
        assert_eq!(stored.cleared_at_ms, Some(500));
        assert!(board.active_assignment_for_unit(unit_id).is_none());
    }

    #[test]
    fn offline_refused_while_assigned() {
        let mut board = DispatchBoard::new();
        let unit = unit_at("F-9", UnitCategory::Fire, 40.0, -74.0);
        let incident = incident_at(40.01, -74.0, 3);
        let (unit_id, incident_id) = (unit.id, incident.id);
        board.upsert_unit(unit);
        board.upsert_incident(incident);

        apply_unit_status(&mut board, unit_id, UnitStatus::Offline, 50).unwrap();
        apply_unit_status(&mut board, unit_id, UnitStatus::Available, 60).unwrap();
        commit_assignment(&mut board, unit_id, incident_id, None, None, 100).unwrap();
        let err = apply_unit_status(&mut board, unit_id, UnitStatus::Offline, 200).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidState);
        assert_eq!(board.unit(unit_id).unwrap().status, UnitStatus::EnRoute);
    }

    #[test]
    fn en_route_without_assignment_is_refused() {
        let mut board = DispatchBoard::new();
        let unit = unit_at("P-3", UnitCategory::Police, 40.0, -74.0);
        let unit_id = unit.id;
        board.upsert_unit(unit);
        let err = apply_unit_status(&mut board, unit_id, UnitStatus::EnRoute, 10).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidState);
    }

    #[test]
    fn notes_require_text() {
        let mut board = DispatchBoard::new();
        let incident = register_incident(&mut board, incident_at(40.0, -74.0, 2), 5).unwrap();
        let err = add_note(&mut board, incident.id, "  ", 10).unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        let updated = add_note(&mut board, incident.id, "caller called back", 20).unwrap();
        assert_eq!(updated.notes.len(), 1);
        assert_eq!(updated.updated_at_ms, 20);
        let kinds: Vec<EventKind> = board
            .events()
            .timeline(incident.id)
            .iter()
            .map(|event| event.kind)
            .collect();
        assert_eq!(kinds, vec![EventKind::IncidentCreated, EventKind::NoteAdded]);
    }

    #[test]
    fn register_rejects_bad_positions_and_duplicates() {
        let mut board = DispatchBoard::new();
        let err = register_incident(&mut board, incident_at(95.0, -74.0, 2), 5).unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        let incident = incident_at(40.0, -74.0, 2);
        register_incident(&mut board, incident.clone(), 5).unwrap();
        let err = register_incident(&mut board, incident, 6).unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);
    }

    #[test]
    fn cancelling_releases_units() {
        let mut board = DispatchBoard::new();
        let first = unit_at("P-5", UnitCategory::Police, 40.0, -74.0);
        let second = unit_at("P-6", UnitCategory::Police, 40.0, -74.1);
        let incident = incident_at(40.01, -74.0, 2);
        let ids = (first.id, second.id, incident.id);
        board.upsert_unit(first);
        board.upsert_unit(second);
        board.upsert_incident(incident);
        commit_assignment(&mut board, ids.0, ids.2, None, None, 100).unwrap();
        commit_assignment(&mut board, ids.1, ids.2, None, None, 110).unwrap();

        let incident = cancel_incident(&mut board, ids.2, "duplicate call", 200).unwrap();
        assert_eq!(incident.status, IncidentStatus::Cancelled);
        assert!(board.active_assignments_for_incident(ids.2).is_empty());
        assert_eq!(board.unit(ids.0).unwrap().status, UnitStatus::Available);
        assert_eq!(board.unit(ids.1).unwrap().status, UnitStatus::Available);

        let again = cancel_incident(&mut board, ids.2, "", 300);
        assert_eq!(again.unwrap_err().code, ErrorCode::InvalidState);
        let outcome = LifecycleOutcome::from_result(&board.require_incident(ids.2).cloned());
        assert!(outcome.success);
        assert_eq!(outcome.status, Some(IncidentStatus::Cancelled));
    }
}
