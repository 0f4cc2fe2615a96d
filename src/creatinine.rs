use crate::{
    errors::VancoError,
    models::*,
    parameters::{ParameterCalculator, FALLBACK_CREATININE, MIN_CREATININE},
    Result,
};
use chrono::{Duration, NaiveDateTime};
use itertools::Itertools;

/// Hours between the last measurement and the clinician's future anchor.
pub const FUTURE_ANCHOR_HOURS: i64 = 48;

/// Anything that can report creatinine (and possibly kinetic GFR) over time.
pub trait CreatinineFunction {
    fn reading_at(&self, when: NaiveDateTime) -> CreatinineReading;
}

impl<F> CreatinineFunction for F
where
    F: Fn(NaiveDateTime) -> CreatinineReading,
{
    fn reading_at(&self, when: NaiveDateTime) -> CreatinineReading {
        self(when)
    }
}

/// Piecewise-linear creatinine trajectory built from measured values.
#[derive(Debug, Clone)]
pub struct CreatinineModel {
    measured: Vec<CreatinineMeasurement>,
    anchor: Option<CreatinineMeasurement>,
    constant: Option<f64>,
    patient: Option<Patient>,
}

impl CreatinineModel {
    /// Build the trajectory.
    ///
    /// * `future_value` adds an anchor 48 h after the last measurement.
    /// * `modifier_factor` other than 1.0 replaces the history with a constant
    ///   of first value × factor.
    /// * `patient` enables kinetic GFR once two measurements exist.
    pub fn build(
        series: &[CreatinineMeasurement],
        future_value: Option<f64>,
        modifier_factor: f64,
        patient: Option<&Patient>,
    ) -> Result<Self> {
        if series.is_empty() {
            return Err(VancoError::InsufficientData(
                "At least one creatinine measurement is required".to_string()
            ));
        }
        if !(modifier_factor.is_finite() && modifier_factor > 0.0) {
            return Err(VancoError::InvalidInput(format!(
                "Creatinine modifier must be positive, got {}", modifier_factor
            )));
        }

        let measured: Vec<CreatinineMeasurement> = series
            .iter()
            .map(|m| CreatinineMeasurement { time: m.time, value: Self::repair_value(m.value) })
            .sorted_by_key(|m| m.time)
            .dedup_by(|a, b| a.time == b.time)
            .collect();

        if modifier_factor != 1.0 {
            let value = measured[0].value * modifier_factor;
            log::debug!("Creatinine held constant at {:.1} (modifier {})", value, modifier_factor);
            return Ok(Self::from_parts(measured, None, Some(value), None));
        }

        if measured.len() < 2 {
            if future_value.is_some() {
                log::debug!("Future creatinine ignored: a single measurement is held constant");
            }
            let value = measured[0].value;
            return Ok(Self::from_parts(measured, None, Some(value), None));
        }

        let anchor = future_value.map(|value| {
            let last = measured[measured.len() - 1].time;
            CreatinineMeasurement {
                time: last + Duration::hours(FUTURE_ANCHOR_HOURS),
                value: Self::repair_value(value),
            }
        });

        Ok(Self::from_parts(measured, anchor, None, patient.cloned()))
    }

    /// A single measurement held for all time.
    pub fn constant(time: NaiveDateTime, value: f64) -> Self {
        let value = Self::repair_value(value);
        Self::from_parts(vec![CreatinineMeasurement { time, value }], None, Some(value), None)
    }

    fn from_parts(
        measured: Vec<CreatinineMeasurement>,
        anchor: Option<CreatinineMeasurement>,
        constant: Option<f64>,
        patient: Option<Patient>,
    ) -> Self {
        Self { measured, anchor, constant, patient }
    }

    fn repair_value(value: f64) -> f64 {
        if value.is_finite() && value > 0.0 {
            value
        } else {
            log::warn!(
                "Creatinine value {} is not physical, using {} µmol/L",
                value, FALLBACK_CREATININE
            );
            FALLBACK_CREATININE
        }
    }

    pub fn measurements(&self) -> &[CreatinineMeasurement] {
        &self.measured
    }

    pub fn is_constant(&self) -> bool {
        self.constant.is_some()
    }

    pub fn supports_kinetic_gfr(&self) -> bool {
        self.constant.is_none() && self.patient.is_some() && self.measured.len() >= 2
    }

    /// Creatinine (µmol/L) at `when`, floored at the physiological minimum.
    pub fn value_at(&self, when: NaiveDateTime) -> f64 {
        let value = match self.constant {
            Some(value) => value,
            None => self.interpolate(when),
        };
        value.max(MIN_CREATININE)
    }

    fn interpolate(&self, when: NaiveDateTime) -> f64 {
        let knots: Vec<&CreatinineMeasurement> =
            self.measured.iter().chain(self.anchor.iter()).collect();

        let first = knots[0];
        let last = knots[knots.len() - 1];
        if when <= first.time {
            return first.value;
        }
        if when >= last.time {
            return last.value;
        }

        knots
            .iter()
            .tuple_windows()
            .find(|(_, b)| when <= b.time)
            .map(|(a, b)| {
                let span = hours_between(a.time, b.time);
                let fraction = hours_between(a.time, when) / span;
                a.value + (b.value - a.value) * fraction
            })
            .unwrap_or(last.value)
    }

    /// Kinetic GFR (mL/min) for the measured interval containing `when`.
    ///
    /// Times before the first interval use the first; times after the last
    /// measurement reuse the most recent interval.
    pub fn kinetic_gfr_at(&self, when: NaiveDateTime) -> Option<f64> {
        if !self.supports_kinetic_gfr() {
            return None;
        }
        let patient = self.patient.as_ref()?;

        let n = self.measured.len();
        let reached = self.measured.partition_point(|m| m.time <= when);
        let idx = reached.saturating_sub(1).min(n - 2);

        let (a, b) = (&self.measured[idx], &self.measured[idx + 1]);
        let delta_hours = hours_between(a.time, b.time);

        Some(ParameterCalculator::kinetic_gfr(patient, a.value, b.value, delta_hours))
    }
}

impl CreatinineFunction for CreatinineModel {
    fn reading_at(&self, when: NaiveDateTime) -> CreatinineReading {
        CreatinineReading {
            value: self.value_at(when),
            kinetic_gfr: self.kinetic_gfr_at(when),
        }
    }
}
