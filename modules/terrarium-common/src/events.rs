//! Unified event enum — facts about what happened in the simulation.
//!
//! Every variant describes something the system observed or decided.
//! Events serialize to `serde_json::Value` for the generic EventStore;
//! the `type` tag becomes the `event_type` column.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{CognitionAvailability, PressureType, RejectReason, WeatherState};

/// Topic names are namespaced per domain with a version suffix.
pub const TOPIC_GATE: &str = "gate.v1";
pub const TOPIC_PHYSICS: &str = "physics.v1";
pub const TOPIC_PRESSURE: &str = "pressure.v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // -----------------------------------------------------------------------
    // Gate facts — admission decisions
    // -----------------------------------------------------------------------
    ActionAccepted {
        attempt_id: Uuid,
        agent_id: Uuid,
        agent_handle: String,
        action_type: String,
        deployment: String,
        cost: f64,
        remaining_balance: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject_agent_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        participants: Vec<Uuid>,
    },

    ActionRejected {
        attempt_id: Uuid,
        agent_id: Uuid,
        action_type: String,
        deployment: String,
        reason: RejectReason,
        requested_cost: f64,
    },

    // -----------------------------------------------------------------------
    // Physics facts — environment transitions
    // -----------------------------------------------------------------------
    PhysicsTicked {
        deployment: String,
        regime: String,
        weather: WeatherState,
        cognition: CognitionAvailability,
        max_throughput_per_minute: i32,
        throttle_factor: f64,
        rng_seed: i64,
        rng_sequence: i64,
    },

    RegimeApplied {
        deployment: String,
        regime: String,
    },

    EnvironmentOverridden {
        deployment: String,
        cognition: CognitionAvailability,
        max_throughput_per_minute: i32,
        throttle_factor: f64,
        #[serde(default)]
        active_window: Option<String>,
        reason: Option<String>,
    },

    // -----------------------------------------------------------------------
    // Pressure facts — sponsor economics
    // -----------------------------------------------------------------------
    CreditsPurchased {
        sponsor_id: Uuid,
        amount: i64,
    },

    PressureCreated {
        pressure_id: Uuid,
        sponsor_id: Uuid,
        deployment: String,
        pressure_type: PressureType,
        magnitude: f64,
        half_life_seconds: i64,
        credits_debited: i64,
    },

    PressureCancelled {
        pressure_id: Uuid,
        sponsor_id: Uuid,
        deployment: String,
    },
}

impl Event {
    /// The snake_case event type string for this variant.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::ActionAccepted { .. } => "action_accepted",
            Event::ActionRejected { .. } => "action_rejected",
            Event::PhysicsTicked { .. } => "physics_ticked",
            Event::RegimeApplied { .. } => "regime_applied",
            Event::EnvironmentOverridden { .. } => "environment_overridden",
            Event::CreditsPurchased { .. } => "credits_purchased",
            Event::PressureCreated { .. } => "pressure_created",
            Event::PressureCancelled { .. } => "pressure_cancelled",
        }
    }

    /// The versioned topic this event publishes to.
    pub fn topic(&self) -> &'static str {
        match self {
            Event::ActionAccepted { .. } | Event::ActionRejected { .. } => TOPIC_GATE,
            Event::PhysicsTicked { .. }
            | Event::RegimeApplied { .. }
            | Event::EnvironmentOverridden { .. } => TOPIC_PHYSICS,
            Event::CreditsPurchased { .. }
            | Event::PressureCreated { .. }
            | Event::PressureCancelled { .. } => TOPIC_PRESSURE,
        }
    }

    /// Serialize this event to a JSON Value for the envelope payload.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("Event serialization should never fail")
    }

    /// Deserialize an event from an envelope payload.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_matches_serde_tag() {
        let event = Event::PhysicsTicked {
            deployment: "meadow".into(),
            regime: "calm".into(),
            weather: WeatherState::Clear,
            cognition: CognitionAvailability::Full,
            max_throughput_per_minute: 120,
            throttle_factor: 1.0,
            rng_seed: 42,
            rng_sequence: 7,
        };
        assert_eq!(event.event_type(), "physics_ticked");

        let json = event.to_payload();
        assert_eq!(json["type"].as_str().unwrap(), "physics_ticked");
    }

    #[test]
    fn rejection_roundtrip() {
        let event = Event::ActionRejected {
            attempt_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            action_type: "forage".into(),
            deployment: "meadow".into(),
            reason: RejectReason::ThroughputLimited,
            requested_cost: 3.0,
        };

        let payload = event.to_payload();
        let roundtripped = Event::from_payload(&payload).unwrap();

        match roundtripped {
            Event::ActionRejected { reason, action_type, .. } => {
                assert_eq!(reason, RejectReason::ThroughputLimited);
                assert_eq!(action_type, "forage");
            }
            _ => panic!("Expected ActionRejected"),
        }
    }

    #[test]
    fn topics_carry_version_suffix() {
        let event = Event::CreditsPurchased {
            sponsor_id: Uuid::nil(),
            amount: 100,
        };
        assert!(event.topic().ends_with(".v1"));
    }
}
