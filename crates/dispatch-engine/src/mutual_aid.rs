//! Requests for resources from neighbouring agencies.

use dispatch_api::AgencyDirectory;
use dispatch_core::{
    age_millis, Agency, AgencyId, AidOutcome, AidPriority, AidRequestId, DispatchError,
    DispatchResult, EpochMillis, IncidentId, MutualAidRequest, UnitCategory,
};
use dispatch_observability::names;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// What is being asked for, independent of which agency is asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AidOrder {
    pub category: UnitCategory,
    pub quantity: u32,
    #[serde(default)]
    pub priority: AidPriority,
    #[serde(default)]
    pub notes: String,
}

/// Request form prefilled from a selected agency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AidDraft {
    pub agency_id: AgencyId,
    pub agency_name: String,
    pub available_units: u32,
    pub order: AidOrder,
}

pub type AgencyListener = Box<dyn Fn(&Agency) + Send + Sync>;

/// Errors with [`ErrorCode::StaleData`](dispatch_core::ErrorCode) when a
/// snapshot observed at `observed_at` is older than `max_age_ms` at `now`.
pub fn check_freshness(
    observed_at: EpochMillis,
    now: EpochMillis,
    max_age_ms: u64,
) -> DispatchResult<()> {
    let age = age_millis(observed_at, now);
    if age > max_age_ms {
        return Err(DispatchError::stale(format!(
            "agency availability is {age} ms old, limit is {max_age_ms} ms"
        )));
    }
    Ok(())
}

/// Builds a pending request against `agency`. Availability is advisory and
/// is never decremented here.
pub fn request_aid(
    agency: &Agency,
    incident_id: IncidentId,
    order: AidOrder,
    at: EpochMillis,
) -> DispatchResult<MutualAidRequest> {
    if order.quantity < 1 {
        return Err(DispatchError::validation("at least one unit must be requested"));
    }
    if order.quantity > agency.available_units {
        return Err(DispatchError::validation(format!(
            "{} has {} {} units available, {} requested",
            agency.name, agency.available_units, order.category, order.quantity
        )));
    }
    Ok(MutualAidRequest {
        id: AidRequestId::new(),
        agency_id: agency.id,
        incident_id,
        category: order.category,
        quantity: order.quantity,
        priority: order.priority,
        notes: order.notes.trim().to_string(),
        outcome: AidOutcome::Pending,
        created_at_ms: at,
    })
}

pub struct MutualAidCoordinator {
    agencies: Vec<Agency>,
    observed_at_ms: Option<EpochMillis>,
    max_age_ms: u64,
    requests: Vec<MutualAidRequest>,
    listener: Option<AgencyListener>,
}

impl fmt::Debug for MutualAidCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutualAidCoordinator")
            .field("agencies", &self.agencies.len())
            .field("observed_at_ms", &self.observed_at_ms)
            .field("max_age_ms", &self.max_age_ms)
            .field("requests", &self.requests.len())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl MutualAidCoordinator {
    pub fn new(max_age_ms: u64) -> Self {
        Self {
            agencies: Vec::new(),
            observed_at_ms: None,
            max_age_ms,
            requests: Vec::new(),
            listener: None,
        }
    }

    /// Registers the callback fired whenever an agency is selected.
    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Agency) + Send + Sync + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn load_agencies(&mut self, agencies: Vec<Agency>, observed_at: EpochMillis) {
        self.agencies = agencies;
        self.observed_at_ms = Some(observed_at);
    }

    pub async fn refresh(
        &mut self,
        directory: &dyn AgencyDirectory,
        now: EpochMillis,
    ) -> DispatchResult<()> {
        let agencies = directory.list_agencies().await?;
        info!(count = agencies.len(), "agency directory refreshed");
        self.load_agencies(agencies, now);
        Ok(())
    }

    pub fn agencies(&self) -> &[Agency] {
        &self.agencies
    }

    pub fn observed_at(&self) -> Option<EpochMillis> {
        self.observed_at_ms
    }

    /// Freshness of the loaded agency snapshot. A coordinator that never
    /// loaded agencies is stale.
    pub fn check_snapshot(&self, now: EpochMillis) -> DispatchResult<()> {
        match self.observed_at_ms {
            Some(observed_at) => check_freshness(observed_at, now, self.max_age_ms),
            None => Err(DispatchError::stale("agency directory has not been loaded")),
        }
    }

    pub fn select_agency(&self, agency_id: AgencyId) -> DispatchResult<AidDraft> {
        let agency = self
            .agencies
            .iter()
            .find(|agency| agency.id == agency_id)
            .ok_or_else(|| DispatchError::not_found(format!("agency {agency_id} not found")))?;
        if let Some(listener) = &self.listener {
            listener(agency);
        }
        Ok(AidDraft {
            agency_id: agency.id,
            agency_name: agency.name.clone(),
            available_units: agency.available_units,
            order: AidOrder {
                category: agency.category,
                quantity: 1,
                priority: AidPriority::default(),
                notes: String::new(),
            },
        })
    }

    /// Validates and keeps a request against the loaded snapshot of `agency_id`.
    pub fn submit(
        &mut self,
        agency_id: AgencyId,
        incident_id: IncidentId,
        order: AidOrder,
        at: EpochMillis,
    ) -> DispatchResult<MutualAidRequest> {
        if let Err(err) = self.check_snapshot(at) {
            warn!(error = %err, "requesting aid against an old agency snapshot");
        }
        let agency = self
            .agencies
            .iter()
            .find(|agency| agency.id == agency_id)
            .ok_or_else(|| DispatchError::not_found(format!("agency {agency_id} not found")))?
            .clone();
        let request = request_aid(&agency, incident_id, order, at)?;
        Ok(self.keep(&agency, request))
    }

    /// Re-reads the agency from `directory` before validating, so the
    /// quantity is checked against current availability.
    pub async fn submit_current(
        &mut self,
        directory: &dyn AgencyDirectory,
        agency_id: AgencyId,
        incident_id: IncidentId,
        order: AidOrder,
        at: EpochMillis,
    ) -> DispatchResult<MutualAidRequest> {
        let agency = directory
            .get_agency(agency_id)
            .await?
            .ok_or_else(|| DispatchError::not_found(format!("agency {agency_id} not found")))?;
        let request = request_aid(&agency, incident_id, order, at)?;
        match self.agencies.iter_mut().find(|known| known.id == agency_id) {
            Some(known) => *known = agency.clone(),
            None => self.agencies.push(agency.clone()),
        }
        Ok(self.keep(&agency, request))
    }

    pub fn mark_sent(&mut self, request_id: AidRequestId) -> DispatchResult<MutualAidRequest> {
        let request = self
            .requests
            .iter_mut()
            .find(|request| request.id == request_id)
            .ok_or_else(|| {
                DispatchError::not_found(format!("aid request {request_id} not found"))
            })?;
        if request.outcome != AidOutcome::Pending {
            return Err(DispatchError::invalid_state(format!(
                "aid request {request_id} was already sent"
            )));
        }
        request.outcome = AidOutcome::Sent;
        Ok(request.clone())
    }

    pub fn requests(&self) -> &[MutualAidRequest] {
        &self.requests
    }

    pub fn requests_for_incident(&self, incident_id: IncidentId) -> Vec<&MutualAidRequest> {
        self.requests
            .iter()
            .filter(|request| request.incident_id == incident_id)
            .collect()
    }

    fn keep(&mut self, agency: &Agency, request: MutualAidRequest) -> MutualAidRequest {
        metrics::counter!(names::MUTUAL_AID_REQUESTS, "category" => request.category.as_str())
            .increment(1);
        info!(
            agency = %agency.name,
            incident_id = %request.incident_id,
            quantity = request.quantity,
            priority = ?request.priority,
            "mutual aid requested"
        );
        self.requests.push(request.clone());
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDispatchApi;
    use dispatch_core::{AgencyContact, Coordinate, ErrorCode};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn agency(available_units: u32) -> Agency {
        Agency {
            id: AgencyId::new(),
            name: "Riverside Fire".to_string(),
            category: UnitCategory::Fire,
            location: Coordinate::new(40.8, -73.9),
            available_units,
            response_time_minutes: 12,
            contact: AgencyContact::default(),
        }
    }

    fn order(quantity: u32) -> AidOrder {
        AidOrder {
            category: UnitCategory::Fire,
            quantity,
            priority: AidPriority::Urgent,
            notes: "  structure fire  ".to_string(),
        }
    }

    #[test]
    fn quantity_must_fit_availability() {
        let neighbour = agency(2);
        let incident = IncidentId::new();

        let err = request_aid(&neighbour, incident, order(3), 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        let err = request_aid(&neighbour, incident, order(0), 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);

        let request = request_aid(&neighbour, incident, order(2), 5).unwrap();
        assert_eq!(request.outcome, AidOutcome::Pending);
        assert_eq!(request.notes, "structure fire");
        assert_eq!(neighbour.available_units, 2);
    }

    #[test]
    fn freshness_window() {
        assert!(check_freshness(1_000, 61_000, 60_000).is_ok());
        let err = check_freshness(1_000, 61_001, 60_000).unwrap_err();
        assert_eq!(err.code, ErrorCode::StaleData);
        assert!(check_freshness(5_000, 1_000, 60_000).is_ok());

        let coordinator = MutualAidCoordinator::new(60_000);
        assert_eq!(coordinator.check_snapshot(0).unwrap_err().code, ErrorCode::StaleData);
    }

    #[test]
    fn selecting_an_agency_notifies_and_prefills() {
        let selected = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&selected);
        let mut coordinator =
            MutualAidCoordinator::new(60_000).with_listener(move |_agency: &Agency| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        let neighbour = agency(4);
        coordinator.load_agencies(vec![neighbour.clone()], 0);

        let draft = coordinator.select_agency(neighbour.id).unwrap();
        assert_eq!(selected.load(Ordering::SeqCst), 1);
        assert_eq!(draft.order.category, UnitCategory::Fire);
        assert_eq!(draft.order.quantity, 1);
        assert_eq!(draft.order.priority, AidPriority::Normal);
        assert_eq!(draft.available_units, 4);

        let err = coordinator.select_agency(AgencyId::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(selected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mark_sent_only_from_pending() {
        let mut coordinator = MutualAidCoordinator::new(60_000);
        let neighbour = agency(2);
        coordinator.load_agencies(vec![neighbour.clone()], 0);
        let incident = IncidentId::new();
        let request = coordinator.submit(neighbour.id, incident, order(1), 10).unwrap();

        let sent = coordinator.mark_sent(request.id).unwrap();
        assert_eq!(sent.outcome, AidOutcome::Sent);
        let err = coordinator.mark_sent(request.id).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidState);
        assert_eq!(coordinator.requests_for_incident(incident).len(), 1);
        assert_eq!(coordinator.agencies()[0].available_units, 2);
    }

    #[test]
    fn submit_uses_loaded_snapshot_even_when_old() {
        let mut coordinator = MutualAidCoordinator::new(1_000);
        let neighbour = agency(2);
        coordinator.load_agencies(vec![neighbour.clone()], 0);
        let incident = IncidentId::new();

        let err = coordinator
            .submit(neighbour.id, incident, order(3), 50_000)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        let err = coordinator
            .submit(AgencyId::new(), incident, order(1), 50_000)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);

        let request = coordinator
            .submit(neighbour.id, incident, order(2), 50_000)
            .unwrap();
        assert_eq!(request.quantity, 2);
        assert_eq!(coordinator.requests().len(), 1);
    }

    #[tokio::test]
    async fn submit_current_checks_fresh_availability() {
        let neighbour = agency(3);
        let api = InMemoryDispatchApi::new().with_agencies(vec![neighbour.clone()]);
        let mut coordinator = MutualAidCoordinator::new(60_000);
        coordinator.refresh(&api, 0).await.unwrap();

        api.set_agency_availability(neighbour.id, 1).unwrap();
        let incident = IncidentId::new();
        let err = coordinator
            .submit_current(&api, neighbour.id, incident, order(2), 10)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);

        let request = coordinator
            .submit_current(&api, neighbour.id, incident, order(1), 20)
            .await
            .unwrap();
        assert_eq!(request.quantity, 1);
        assert_eq!(coordinator.agencies()[0].available_units, 1);
    }
}
