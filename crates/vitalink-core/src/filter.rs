//! Measurement filtering

use crate::device::Measurement;
use crate::reading::UserSlot;

/// Keep the readings that belong to `user`, preserving their order
pub fn filter_by_user<R: Measurement>(readings: Vec<R>, user: UserSlot) -> Vec<R> {
    readings
        .into_iter()
        .filter(|reading| reading.user_slot() == user)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::BloodPressureReading;
    use chrono::NaiveDate;

    fn reading(user: UserSlot, pulse: u8) -> BloodPressureReading {
        let at = NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(7, 0, 0)
            .unwrap();
        BloodPressureReading::new(120, 80, pulse, user, false, false, at)
    }

    #[test]
    fn test_keeps_order() {
        let readings = vec![
            reading(UserSlot::A, 60),
            reading(UserSlot::B, 61),
            reading(UserSlot::A, 62),
            reading(UserSlot::B, 63),
            reading(UserSlot::A, 64),
        ];
        let pulses: Vec<u8> = filter_by_user(readings.clone(), UserSlot::A)
            .iter()
            .map(|r| r.pulse_rate())
            .collect();
        assert_eq!(pulses, vec![60, 62, 64]);

        let pulses: Vec<u8> = filter_by_user(readings, UserSlot::B)
            .iter()
            .map(|r| r.pulse_rate())
            .collect();
        assert_eq!(pulses, vec![61, 63]);
    }

    #[test]
    fn test_empty() {
        let readings: Vec<BloodPressureReading> = Vec::new();
        assert!(filter_by_user(readings, UserSlot::A).is_empty());
        assert!(filter_by_user(vec![reading(UserSlot::B, 70)], UserSlot::A).is_empty());
    }
}
