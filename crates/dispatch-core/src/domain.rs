use crate::error::{DispatchError, DispatchResult};
use crate::ids::{AgencyId, AidRequestId, AssignmentId, IncidentId, OperatorId, UnitId};
use crate::time::EpochMillis;
use dispatch_geo::Coordinate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitCategory {
    Police,
    Fire,
    Ems,
    Special,
}

impl UnitCategory {
    pub const ALL: [Self; 4] = [Self::Police, Self::Fire, Self::Ems, Self::Special];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Police => "police",
            Self::Fire => "fire",
            Self::Ems => "ems",
            Self::Special => "special",
        }
    }
}

impl fmt::Display for UnitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Available,
    EnRoute,
    OnScene,
    Offline,
}

impl Default for UnitStatus {
    fn default() -> Self {
        Self::Available
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Available => "available",
            Self::EnRoute => "en_route",
            Self::OnScene => "on_scene",
            Self::Offline => "offline",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentCategory {
    Fire,
    Medical,
    Police,
    Traffic,
    Other,
}

/// Incident urgency, 1 (critical) through 4 (low). Lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const CRITICAL: Self = Self(1);
    pub const HIGH: Self = Self(2);
    pub const MODERATE: Self = Self(3);
    pub const LOW: Self = Self(4);

    pub fn new(value: u8) -> DispatchResult<Self> {
        if (1..=4).contains(&value) {
            Ok(Self(value))
        } else {
            Err(DispatchError::validation(format!(
                "priority must be between 1 and 4, got {value}"
            )))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Priority {
    type Error = DispatchError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    New,
    Dispatched,
    EnRoute,
    OnScene,
    Resolved,
    Cancelled,
}

impl IncidentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Cancelled)
    }

    /// Position along the response progression; terminal states rank last.
    pub fn progress(self) -> u8 {
        match self {
            Self::New => 0,
            Self::Dispatched => 1,
            Self::EnRoute => 2,
            Self::OnScene => 3,
            Self::Resolved | Self::Cancelled => 4,
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::New => "new",
            Self::Dispatched => "dispatched",
            Self::EnRoute => "en_route",
            Self::OnScene => "on_scene",
            Self::Resolved => "resolved",
            Self::Cancelled => "cancelled",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Dispatched,
    EnRoute,
    OnScene,
    Cleared,
    Cancelled,
}

impl AssignmentStatus {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Dispatched | Self::EnRoute | Self::OnScene)
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Dispatched => "dispatched",
            Self::EnRoute => "en_route",
            Self::OnScene => "on_scene",
            Self::Cleared => "cleared",
            Self::Cancelled => "cancelled",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub call_sign: String,
    pub category: UnitCategory,
    pub position: Coordinate,
    #[serde(default)]
    pub position_at_ms: Option<EpochMillis>,
    #[serde(default)]
    pub status: UnitStatus,
    #[serde(default)]
    pub assigned_incident: Option<IncidentId>,
    #[serde(default)]
    pub assigned_operator: Option<OperatorId>,
}

impl Unit {
    pub fn new(call_sign: impl Into<String>, category: UnitCategory, position: Coordinate) -> Self {
        Self {
            id: UnitId::new(),
            call_sign: call_sign.into(),
            category,
            position,
            position_at_ms: None,
            status: UnitStatus::Available,
            assigned_incident: None,
            assigned_operator: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerInfo {
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentNote {
    pub text: String,
    pub added_at_ms: EpochMillis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub number: String,
    pub category: IncidentCategory,
    pub priority: Priority,
    pub status: IncidentStatus,
    pub position: Coordinate,
    #[serde(default)]
    pub address: Option<String>,
    pub description: String,
    #[serde(default)]
    pub caller: CallerInfo,
    #[serde(default)]
    pub notes: Vec<IncidentNote>,
    #[serde(default)]
    pub resolution_summary: Option<String>,
    pub created_at_ms: EpochMillis,
    pub updated_at_ms: EpochMillis,
    #[serde(default)]
    pub resolved_at_ms: Option<EpochMillis>,
}

impl Incident {
    pub fn new(
        number: impl Into<String>,
        category: IncidentCategory,
        priority: Priority,
        position: Coordinate,
        description: impl Into<String>,
        created_at_ms: EpochMillis,
    ) -> Self {
        Self {
            id: IncidentId::new(),
            number: number.into(),
            category,
            priority,
            status: IncidentStatus::New,
            position,
            address: None,
            description: description.into(),
            caller: CallerInfo::default(),
            notes: Vec::new(),
            resolution_summary: None,
            created_at_ms,
            updated_at_ms: created_at_ms,
            resolved_at_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub unit_id: UnitId,
    pub incident_id: IncidentId,
    pub status: AssignmentStatus,
    #[serde(default)]
    pub dispatched_by: Option<OperatorId>,
    #[serde(default)]
    pub dispatch_notes: Option<String>,
    #[serde(default)]
    pub arrival_notes: Option<String>,
    #[serde(default)]
    pub clearance_notes: Option<String>,
    pub dispatched_at_ms: EpochMillis,
    #[serde(default)]
    pub en_route_at_ms: Option<EpochMillis>,
    #[serde(default)]
    pub on_scene_at_ms: Option<EpochMillis>,
    #[serde(default)]
    pub cleared_at_ms: Option<EpochMillis>,
    #[serde(default)]
    pub cancelled_at_ms: Option<EpochMillis>,
}

impl Assignment {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub unit_id: UnitId,
    pub position: Coordinate,
    pub timestamp_ms: EpochMillis,
    pub status: UnitStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyContact {
    pub phone: Option<String>,
    pub radio: Option<String>,
}

/// A neighbouring agency as advertised by its own system. Availability is
/// informational; nothing here reserves units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agency {
    pub id: AgencyId,
    pub name: String,
    pub category: UnitCategory,
    pub location: Coordinate,
    pub available_units: u32,
    pub response_time_minutes: u32,
    #[serde(default)]
    pub contact: AgencyContact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AidPriority {
    Normal,
    Urgent,
    Emergency,
}

impl Default for AidPriority {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AidOutcome {
    Pending,
    Sent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutualAidRequest {
    pub id: AidRequestId,
    pub agency_id: AgencyId,
    pub incident_id: IncidentId,
    pub category: UnitCategory,
    pub quantity: u32,
    pub priority: AidPriority,
    #[serde(default)]
    pub notes: String,
    pub outcome: AidOutcome,
    pub created_at_ms: EpochMillis,
}
