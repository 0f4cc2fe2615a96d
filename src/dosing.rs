use crate::{errors::VancoError, models::*, Result};
use chrono::NaiveDateTime;

pub struct DoseScheduleBuilder;

impl DoseScheduleBuilder {
    /// Pair clinician-entered amounts with their administration times.
    pub fn build_manual_doses(
        amounts: &[f64],
        times: &[NaiveDateTime],
        sim_start: NaiveDateTime,
    ) -> Result<Vec<Dose>> {
        if amounts.len() != times.len() {
            return Err(VancoError::InvalidDosing(format!(
                "{} dose amounts given for {} dose times",
                amounts.len(),
                times.len()
            )));
        }

        amounts
            .iter()
            .zip(times)
            .map(|(&amount, &time)| {
                Self::check_amount(amount)?;
                Ok(Dose::new(hours_between(sim_start, time), amount))
            })
            .collect()
    }

    /// Standing order every `interval_h` hours from `start` through `sim_end`
    /// (inclusive).
    pub fn build_ordered_doses(
        amount: f64,
        interval_h: f64,
        start: NaiveDateTime,
        sim_start: NaiveDateTime,
        sim_end: NaiveDateTime,
    ) -> Result<Vec<Dose>> {
        if start < sim_start {
            return Err(VancoError::InvalidDosing(format!(
                "Ordered dose start {} is before simulation start {}",
                start, sim_start
            )));
        }
        if !(interval_h.is_finite() && interval_h > 0.0) {
            return Err(VancoError::InvalidDosing(format!(
                "Dosing interval must be positive, got {}", interval_h
            )));
        }
        Self::check_amount(amount)?;

        let first = hours_between(sim_start, start);
        let last = hours_between(sim_start, sim_end);

        let mut doses = Vec::new();
        let mut k = 0u32;
        loop {
            let t = first + k as f64 * interval_h;
            if t > last {
                break;
            }
            doses.push(Dose::new(t, amount));
            k += 1;
        }

        log::debug!("Built {} ordered doses of {} mg q{}h", doses.len(), amount, interval_h);
        Ok(doses)
    }

    fn check_amount(amount: f64) -> Result<()> {
        if amount.is_finite() && amount > 0.0 {
            Ok(())
        } else {
            Err(VancoError::InvalidDosing(format!("Dose amount must be positive, got {}", amount)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_manual_doses_offsets() {
        let times = vec![t0() + Duration::minutes(570), t0() + Duration::hours(21)];
        let doses = DoseScheduleBuilder::build_manual_doses(&[1000.0, 1250.0], &times, t0()).unwrap();

        assert_eq!(doses, vec![Dose::new(9.5, 1000.0), Dose::new(21.0, 1250.0)]);
    }

    #[test]
    fn test_manual_doses_length_mismatch() {
        let times = vec![t0()];
        let err = DoseScheduleBuilder::build_manual_doses(&[1000.0, 1000.0], &times, t0());
        assert!(matches!(err, Err(VancoError::InvalidDosing(_))));
    }

    #[test]
    fn test_ordered_doses_inclusive_end() {
        let start = t0() + Duration::hours(6);
        let end = t0() + Duration::hours(42);
        let doses = DoseScheduleBuilder::build_ordered_doses(1000.0, 12.0, start, t0(), end).unwrap();

        let times: Vec<f64> = doses.iter().map(|d| d.time).collect();
        assert_eq!(times, vec![6.0, 18.0, 30.0, 42.0]);
        assert!(doses.iter().all(|d| d.amount == 1000.0));
    }

    #[test]
    fn test_ordered_start_before_sim_start() {
        let start = t0() - Duration::hours(1);
        let result = DoseScheduleBuilder::build_ordered_doses(1000.0, 12.0, start, t0(), t0() + Duration::days(3));
        assert!(matches!(result, Err(VancoError::InvalidDosing(_))));
    }

    #[test]
    fn test_ordered_rejects_non_positive_interval() {
        let result = DoseScheduleBuilder::build_ordered_doses(1000.0, 0.0, t0(), t0(), t0() + Duration::days(1));
        assert!(result.is_err());
    }
}
