//! Chronicle rendering — a pure function from facts to sentences.
//!
//! Output constraints, tested directly: no raw agent or sponsor
//! identifiers, no numerals or percentages, no credit amounts, no
//! moralizing vocabulary. Only descriptive, physics-flavored language.
//! Sponsor-economy events render to nothing at all.

use terrarium_common::{Event, RejectReason, WeatherState};

/// Reader-facing grouping for the debug endpoint.
pub fn category(event: &Event) -> Option<&'static str> {
    match event {
        Event::ActionAccepted { action_type, .. } => {
            if is_perception(action_type) {
                Some("perception")
            } else {
                Some("activity")
            }
        }
        Event::ActionRejected { .. } => Some("weather"),
        Event::PhysicsTicked { .. }
        | Event::RegimeApplied { .. }
        | Event::EnvironmentOverridden { .. } => Some("climate"),
        Event::CreditsPurchased { .. }
        | Event::PressureCreated { .. }
        | Event::PressureCancelled { .. } => None,
    }
}

pub fn is_perception(action_type: &str) -> bool {
    matches!(
        action_type,
        "critique" | "counter_model" | "refusal" | "rederivation" | "conflict"
    )
}

/// Render one fact to a chronicle sentence, or None when the fact has no
/// place in the observer-facing record.
pub fn render(event: &Event) -> Option<String> {
    match event {
        Event::ActionAccepted {
            action_type,
            deployment,
            ..
        } => Some(render_action(action_type, deployment)),

        Event::ActionRejected {
            deployment, reason, ..
        } => render_rejection(*reason, deployment),

        Event::PhysicsTicked {
            deployment, weather, ..
        } => Some(match weather {
            WeatherState::Clear => format!("Clear air settled over {deployment}."),
            WeatherState::Stormy => format!("A storm rolled across {deployment}."),
            WeatherState::Drought => {
                format!("A dry spell tightened its grip on {deployment}.")
            }
        }),

        Event::RegimeApplied { deployment, .. } => {
            Some(format!("The winds over {deployment} shifted into a new pattern."))
        }

        Event::EnvironmentOverridden { deployment, .. } => {
            Some(format!("Unseen currents adjusted the climate of {deployment}."))
        }

        // The sponsor economy is invisible to the chronicle.
        Event::CreditsPurchased { .. }
        | Event::PressureCreated { .. }
        | Event::PressureCancelled { .. } => None,
    }
}

fn render_action(action_type: &str, deployment: &str) -> String {
    match action_type {
        "observe" => format!("An agent paused to take in the state of {deployment}."),
        "signal" => format!("A signal flickered across {deployment}."),
        "forage" => format!("An agent foraged through the undergrowth of {deployment}."),
        "exchange" => format!("Two agents traded in the open air of {deployment}."),
        "session_join" => format!("An agent drifted into a gathering in {deployment}."),
        "critique" => format!("One agent pressed a critique upon another in {deployment}."),
        "counter_model" => {
            format!("An agent raised a counter-model against a peer in {deployment}.")
        }
        "refusal" => format!("An agent turned away from a peer's overture in {deployment}."),
        "rederivation" => {
            format!("An agent retraced another's reasoning from first steps in {deployment}.")
        }
        "conflict" => format!("Friction sparked between agents in {deployment}."),
        _ => format!("An agent stirred somewhere in {deployment}."),
    }
}

fn render_rejection(reason: RejectReason, deployment: &str) -> Option<String> {
    match reason {
        RejectReason::ThroughputLimited => Some(format!(
            "The paths of {deployment} thickened with traffic until no more could pass."
        )),
        RejectReason::CognitionUnavailable => Some(format!(
            "A haze over {deployment} swallowed an attempted act before it formed."
        )),
        RejectReason::CapacityInsufficient => Some(format!(
            "An agent in {deployment} faltered, its reserves run dry."
        )),
        RejectReason::EnvironmentClosed => Some(format!(
            "The gates of {deployment} stood shut against the hour."
        )),
        // Malformed attempts are not part of the world's story.
        RejectReason::InvalidActionType
        | RejectReason::InvalidContext
        | RejectReason::SponsorCreditInsufficient
        | RejectReason::AgentNotFound
        | RejectReason::InsufficientRole
        | RejectReason::InsufficientCredits => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrarium_common::CognitionAvailability;
    use uuid::Uuid;

    fn renderable_samples() -> Vec<Event> {
        let agent_id = Uuid::new_v4();
        let mut events = vec![
            Event::PhysicsTicked {
                deployment: "meadow".into(),
                regime: "storm".into(),
                weather: WeatherState::Stormy,
                cognition: CognitionAvailability::Degraded,
                max_throughput_per_minute: 30,
                throttle_factor: 2.5,
                rng_seed: 99,
                rng_sequence: 3,
            },
            Event::RegimeApplied {
                deployment: "meadow".into(),
                regime: "swarm".into(),
            },
            Event::EnvironmentOverridden {
                deployment: "meadow".into(),
                cognition: CognitionAvailability::Full,
                max_throughput_per_minute: 120,
                throttle_factor: 1.0,
                active_window: None,
                reason: Some("maintenance".into()),
            },
        ];

        for action in [
            "observe", "signal", "forage", "exchange", "session_join", "critique",
            "counter_model", "refusal", "rederivation", "conflict",
        ] {
            events.push(Event::ActionAccepted {
                attempt_id: Uuid::new_v4(),
                agent_id,
                agent_handle: "wren".into(),
                action_type: action.into(),
                deployment: "meadow".into(),
                cost: 12.5,
                remaining_balance: 87.5,
                subject_agent_id: Some(Uuid::new_v4()),
                participants: vec![],
            });
        }

        for reason in [
            RejectReason::ThroughputLimited,
            RejectReason::CognitionUnavailable,
            RejectReason::CapacityInsufficient,
            RejectReason::EnvironmentClosed,
        ] {
            events.push(Event::ActionRejected {
                attempt_id: Uuid::new_v4(),
                agent_id,
                action_type: "forage".into(),
                deployment: "meadow".into(),
                reason,
                requested_cost: 3.0,
            });
        }

        events
    }

    #[test]
    fn chronicle_text_is_free_of_identifiers_and_numbers() {
        let uuid_pattern = regex::Regex::new(
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        )
        .unwrap();
        let number_pattern = regex::Regex::new(r"\d").unwrap();

        for event in renderable_samples() {
            let text = render(&event).expect("sample should render");
            assert!(!uuid_pattern.is_match(&text), "uuid leaked: {text}");
            assert!(!number_pattern.is_match(&text), "number leaked: {text}");
            assert!(!text.contains('%'), "percentage leaked: {text}");
        }
    }

    #[test]
    fn chronicle_text_never_mentions_sponsors_or_credits() {
        for event in renderable_samples() {
            let text = render(&event).unwrap().to_lowercase();
            assert!(!text.contains("sponsor"), "sponsor leaked: {text}");
            assert!(!text.contains("credit"), "credit leaked: {text}");
        }
    }

    #[test]
    fn chronicle_text_avoids_moral_vocabulary() {
        let blocklist = [
            "good", "bad", "evil", "dangerous", "wicked", "wrong", "immoral",
            "forbidden", "harmful", "villain",
        ];
        for event in renderable_samples() {
            let text = render(&event).unwrap().to_lowercase();
            for word in blocklist {
                assert!(
                    !text.split(|c: char| !c.is_alphabetic()).any(|w| w == word),
                    "moral word '{word}' in: {text}"
                );
            }
        }
    }

    #[test]
    fn sponsor_economy_events_render_to_nothing() {
        let sponsor_id = Uuid::new_v4();
        let silent = [
            Event::CreditsPurchased { sponsor_id, amount: 500 },
            Event::PressureCreated {
                pressure_id: Uuid::new_v4(),
                sponsor_id,
                deployment: "meadow".into(),
                pressure_type: terrarium_common::PressureType::Capacity,
                magnitude: 40.0,
                half_life_seconds: 120,
                credits_debited: 400,
            },
            Event::PressureCancelled {
                pressure_id: Uuid::new_v4(),
                sponsor_id,
                deployment: "meadow".into(),
            },
        ];
        for event in silent {
            assert!(render(&event).is_none());
            assert!(category(&event).is_none());
        }
    }

    #[test]
    fn malformed_attempts_do_not_enter_the_record() {
        let event = Event::ActionRejected {
            attempt_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            action_type: "juggle".into(),
            deployment: "meadow".into(),
            reason: RejectReason::InvalidActionType,
            requested_cost: 0.0,
        };
        assert!(render(&event).is_none());
    }
}
