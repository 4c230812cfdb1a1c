use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Archived,
    Degraded,
    Suspended,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Archived => "archived",
            AgentStatus::Degraded => "degraded",
            AgentStatus::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AgentStatus::Active),
            "archived" => Some(AgentStatus::Archived),
            "degraded" => Some(AgentStatus::Degraded),
            "suspended" => Some(AgentStatus::Suspended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CognitionAvailability {
    Full,
    Degraded,
    Unavailable,
}

impl CognitionAvailability {
    pub fn as_str(&self) -> &'static str {
        match self {
            CognitionAvailability::Full => "full",
            CognitionAvailability::Degraded => "degraded",
            CognitionAvailability::Unavailable => "unavailable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(CognitionAvailability::Full),
            "degraded" => Some(CognitionAvailability::Degraded),
            "unavailable" => Some(CognitionAvailability::Unavailable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherState {
    Clear,
    Stormy,
    Drought,
}

impl WeatherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeatherState::Clear => "clear",
            WeatherState::Stormy => "stormy",
            WeatherState::Drought => "drought",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "clear" => Some(WeatherState::Clear),
            "stormy" => Some(WeatherState::Stormy),
            "drought" => Some(WeatherState::Drought),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureType {
    Capacity,
    Throttle,
    Cognition,
    RedeployBias,
}

impl PressureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PressureType::Capacity => "capacity",
            PressureType::Throttle => "throttle",
            PressureType::Cognition => "cognition",
            PressureType::RedeployBias => "redeploy_bias",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "capacity" => Some(PressureType::Capacity),
            "throttle" => Some(PressureType::Throttle),
            "cognition" => Some(PressureType::Cognition),
            "redeploy_bias" => Some(PressureType::RedeployBias),
            _ => None,
        }
    }

    pub const ALL: [PressureType; 4] = [
        PressureType::Capacity,
        PressureType::Throttle,
        PressureType::Cognition,
        PressureType::RedeployBias,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionContext {
    Solo,
    MultiAgent,
    SessionBound,
}

impl ActionContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionContext::Solo => "solo",
            ActionContext::MultiAgent => "multi_agent",
            ActionContext::SessionBound => "session_bound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "solo" => Some(ActionContext::Solo),
            "multi_agent" => Some(ActionContext::MultiAgent),
            "session_bound" => Some(ActionContext::SessionBound),
            _ => None,
        }
    }
}

/// Observer roles form a strict visibility ordering, not a numeric score.
/// Derived `Ord` uses declaration order: Viewer < Analyst < Auditor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverRole {
    Viewer,
    Analyst,
    Auditor,
}

impl ObserverRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObserverRole::Viewer => "viewer",
            ObserverRole::Analyst => "analyst",
            ObserverRole::Auditor => "auditor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "viewer" => Some(ObserverRole::Viewer),
            "analyst" => Some(ObserverRole::Analyst),
            "auditor" => Some(ObserverRole::Auditor),
            _ => None,
        }
    }
}

/// Why an attempt or request was turned away. Physics-flavored by design
/// constraint: none of these words carry a judgement about the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidActionType,
    InvalidContext,
    CapacityInsufficient,
    EnvironmentClosed,
    ThroughputLimited,
    CognitionUnavailable,
    SponsorCreditInsufficient,
    AgentNotFound,
    InsufficientRole,
    InsufficientCredits,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidActionType => "invalid_action_type",
            RejectReason::InvalidContext => "invalid_context",
            RejectReason::CapacityInsufficient => "capacity_insufficient",
            RejectReason::EnvironmentClosed => "environment_closed",
            RejectReason::ThroughputLimited => "throughput_limited",
            RejectReason::CognitionUnavailable => "cognition_unavailable",
            RejectReason::SponsorCreditInsufficient => "sponsor_credit_insufficient",
            RejectReason::AgentNotFound => "agent_not_found",
            RejectReason::InsufficientRole => "insufficient_role",
            RejectReason::InsufficientCredits => "insufficient_credits",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "invalid_action_type" => Some(RejectReason::InvalidActionType),
            "invalid_context" => Some(RejectReason::InvalidContext),
            "capacity_insufficient" => Some(RejectReason::CapacityInsufficient),
            "environment_closed" => Some(RejectReason::EnvironmentClosed),
            "throughput_limited" => Some(RejectReason::ThroughputLimited),
            "cognition_unavailable" => Some(RejectReason::CognitionUnavailable),
            "sponsor_credit_insufficient" => Some(RejectReason::SponsorCreditInsufficient),
            "agent_not_found" => Some(RejectReason::AgentNotFound),
            "insufficient_role" => Some(RejectReason::InsufficientRole),
            "insufficient_credits" => Some(RejectReason::InsufficientCredits),
            _ => None,
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// --- Domain rows ---

/// A simulated actor. Archived, never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub handle: String,
    pub status: AgentStatus,
    pub deployment_target: String,
    pub sponsor_id: Option<Uuid>,
    pub cognition_provider: String,
    pub throttle_profile: String,
    pub created_at: DateTime<Utc>,
}

/// Regenerating resource balance, 1:1 with an agent.
/// Invariant: 0 <= balance <= max_balance at all times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityAccount {
    pub agent_id: Uuid,
    pub balance: f64,
    pub max_balance: f64,
    pub regen_per_hour: f64,
    pub last_reconciled_at: DateTime<Utc>,
}

/// Immutable reference row describing one action type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCatalogEntry {
    pub action_type: String,
    pub base_cost: f64,
    /// Cost multiplier applied per weather state, keyed by weather string.
    pub environment_modifiers: serde_json::Value,
    pub valid_contexts: Vec<ActionContext>,
    /// Perception-class actions require a subject agent.
    pub requires_subject: bool,
    pub cognition_dependent: bool,
}

/// One row per attempt, accepted or not. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionAttempt {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub action_type: String,
    pub cost: f64,
    pub accepted: bool,
    pub reason: Option<RejectReason>,
    pub idempotency_key: Option<String>,
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Deployment-wide physics parameters. Owned by the physics engine and
/// ops overrides; the action gate only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub deployment_target: String,
    pub weather_state: WeatherState,
    pub cognition_availability: CognitionAvailability,
    pub max_throughput_per_minute: i32,
    pub throttle_factor: f64,
    pub active_regime: Option<String>,
    pub active_window: Option<String>,
    pub reason: Option<String>,
    pub rng_seed: i64,
    pub rng_sequence: i64,
    pub updated_at: DateTime<Utc>,
}

/// A named weather distribution. Exactly one regime is the default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Regime {
    pub name: String,
    pub storm_probability: f64,
    pub drought_probability: f64,
    pub is_default: bool,
}

/// A sponsor-funded decaying influence. Immutable after creation except
/// for the cancellation marker; decay is computed, never written back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SponsorPressure {
    pub id: Uuid,
    pub sponsor_id: Uuid,
    pub target_deployment: String,
    pub pressure_type: PressureType,
    pub magnitude: f64,
    pub half_life_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observer_roles_are_strictly_ordered() {
        assert!(ObserverRole::Viewer < ObserverRole::Analyst);
        assert!(ObserverRole::Analyst < ObserverRole::Auditor);
    }

    #[test]
    fn reject_reasons_roundtrip_through_strings() {
        let all = [
            RejectReason::InvalidActionType,
            RejectReason::InvalidContext,
            RejectReason::CapacityInsufficient,
            RejectReason::EnvironmentClosed,
            RejectReason::ThroughputLimited,
            RejectReason::CognitionUnavailable,
            RejectReason::SponsorCreditInsufficient,
            RejectReason::AgentNotFound,
            RejectReason::InsufficientRole,
            RejectReason::InsufficientCredits,
        ];
        for reason in all {
            assert_eq!(RejectReason::parse(reason.as_str()), Some(reason));
        }
    }

    #[test]
    fn reject_reasons_carry_no_moral_vocabulary() {
        let blocklist = ["good", "bad", "evil", "dangerous", "forbidden", "immoral"];
        let all = [
            "invalid_action_type",
            "invalid_context",
            "capacity_insufficient",
            "environment_closed",
            "throughput_limited",
            "cognition_unavailable",
            "sponsor_credit_insufficient",
            "agent_not_found",
            "insufficient_role",
            "insufficient_credits",
        ];
        for reason in all {
            for word in blocklist {
                assert!(!reason.contains(word), "{reason} contains {word}");
            }
        }
    }
}
