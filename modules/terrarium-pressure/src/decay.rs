//! Exponential half-life decay. Pure functions of stored fields and a
//! sampled time — the decayed value is never written back to storage.

use chrono::{DateTime, Utc};

use terrarium_common::SponsorPressure;

/// `magnitude × 0.5^(elapsed_seconds / half_life_seconds)`.
///
/// Cancellation does not enter into this: a cancelled pressure decays
/// exactly as if it were never cancelled.
pub fn current_magnitude(pressure: &SponsorPressure, now: DateTime<Utc>) -> f64 {
    decayed(
        pressure.magnitude,
        pressure.created_at,
        pressure.half_life_seconds,
        now,
    )
}

pub(crate) fn decayed(
    magnitude: f64,
    created_at: DateTime<Utc>,
    half_life_seconds: i64,
    now: DateTime<Utc>,
) -> f64 {
    let elapsed_secs = (now - created_at).num_milliseconds() as f64 / 1000.0;
    if elapsed_secs <= 0.0 {
        return magnitude;
    }
    magnitude * 0.5f64.powf(elapsed_secs / half_life_seconds as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn pressure(magnitude: f64, half_life_seconds: i64, created_at: DateTime<Utc>) -> SponsorPressure {
        SponsorPressure {
            id: Uuid::new_v4(),
            sponsor_id: Uuid::new_v4(),
            target_deployment: "meadow".into(),
            pressure_type: terrarium_common::PressureType::Capacity,
            magnitude,
            half_life_seconds,
            created_at,
            cancelled_at: None,
        }
    }

    #[test]
    fn magnitude_halves_after_one_half_life() {
        let created = Utc::now();
        let p = pressure(100.0, 60, created);
        let value = current_magnitude(&p, created + Duration::seconds(60));
        assert!((value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn magnitude_at_creation_is_undecayed() {
        let created = Utc::now();
        let p = pressure(-80.0, 120, created);
        assert_eq!(current_magnitude(&p, created), -80.0);
    }

    #[test]
    fn two_half_lives_quarter_the_magnitude() {
        let created = Utc::now();
        let p = pressure(40.0, 300, created);
        let value = current_magnitude(&p, created + Duration::seconds(600));
        assert!((value - 10.0).abs() < 1e-9);
    }

    #[test]
    fn cancellation_does_not_change_the_decay_curve() {
        let created = Utc::now();
        let mut p = pressure(100.0, 60, created);
        let sample = created + Duration::seconds(30);
        let before = current_magnitude(&p, sample);

        p.cancelled_at = Some(created + Duration::seconds(1));
        let after = current_magnitude(&p, sample);

        assert_eq!(before, after);
        assert!((after - 100.0 * 0.5f64.powf(0.5)).abs() < 1e-9);
    }

    #[test]
    fn negative_magnitude_decays_toward_zero_from_below() {
        let created = Utc::now();
        let p = pressure(-100.0, 60, created);
        let value = current_magnitude(&p, created + Duration::seconds(60));
        assert!((value + 50.0).abs() < 1e-9);
    }
}
