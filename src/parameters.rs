use crate::{creatinine::CreatinineFunction, models::*};
use chrono::NaiveDateTime;

pub const LN2: f64 = std::f64::consts::LN_2;

/// Population ke ceiling (5.5 h half-life).
pub const KE_POP_MAX: f64 = LN2 / 5.5;
/// Population ke floor (120 h half-life).
pub const KE_POP_MIN: f64 = LN2 / 120.0;

/// Volume of distribution per kg of dosing weight (L/kg).
pub const VD_PER_KG: f64 = 0.8;
/// Creatinine volume of distribution per kg of dosing weight (L/kg).
pub const CREATININE_VD_PER_KG: f64 = 0.6;

/// Lowest creatinine any formula will see (µmol/L).
pub const MIN_CREATININE: f64 = 10.0;
/// Substitute for missing or non-physical creatinine (µmol/L).
pub const FALLBACK_CREATININE: f64 = 88.4;

const SERUM_TO_PLASMA: f64 = 0.9;
const OBESITY_RATIO: f64 = 1.25;

pub struct ParameterCalculator;

impl ParameterCalculator {
    /// Population ke, Vd and CrCl for the patient at `when`.
    pub fn pk_params_from_patient(
        patient: &Patient,
        creatinine: &dyn CreatinineFunction,
        when: NaiveDateTime,
    ) -> PkParameters {
        let cr = creatinine.reading_at(when).value;
        let crcl = Self::creatinine_clearance(patient, cr);
        let ke = Self::matzke_ke(crcl);
        let vd = Self::volume_of_distribution(patient);

        PkParameters { ke, vd, crcl }
    }

    /// Weightless Cockcroft-Gault in SI units (mL/min), with the
    /// serum-to-plasma correction applied.
    pub fn creatinine_clearance(patient: &Patient, creatinine: f64) -> f64 {
        let cr = Self::sanitize_creatinine(creatinine);

        (140.0 - patient.age as f64)
            * 88.4
            * patient.sex.clearance_factor()
            * SERUM_TO_PLASMA
            * patient.muscle_factor
            / cr
    }

    /// Matzke regression from CrCl to ke, clamped to the population band.
    pub fn matzke_ke(crcl: f64) -> f64 {
        (0.00083 * crcl + 0.0044).clamp(KE_POP_MIN, KE_POP_MAX)
    }

    pub fn ideal_body_weight(patient: &Patient) -> f64 {
        let base = match patient.sex {
            Sex::Male => 50.0,
            Sex::Female => 45.5,
        };
        base + 0.9 * (patient.height_cm - 152.0)
    }

    /// Adjusted body weight when actual exceeds 125% of IBW, actual otherwise.
    pub fn dosing_weight(patient: &Patient) -> f64 {
        let ibw = Self::ideal_body_weight(patient);
        if patient.weight_kg > OBESITY_RATIO * ibw {
            ibw + 0.4 * (patient.weight_kg - ibw)
        } else {
            patient.weight_kg
        }
    }

    pub fn volume_of_distribution(patient: &Patient) -> f64 {
        VD_PER_KG * Self::dosing_weight(patient)
    }

    pub fn creatinine_volume(patient: &Patient) -> f64 {
        CREATININE_VD_PER_KG * Self::dosing_weight(patient)
    }

    /// Kinetic GFR (mL/min) across one creatinine interval.
    ///
    /// Baseline clearance comes from `cr1`; the change to `cr2` over
    /// `delta_hours` is weighed against the creatinine production implied
    /// by that baseline. Negative or undefined results clamp to 0.1.
    pub fn kinetic_gfr(patient: &Patient, cr1: f64, cr2: f64, delta_hours: f64) -> f64 {
        let cr1 = Self::sanitize_creatinine(cr1);
        let cr2 = Self::sanitize_creatinine(cr2);
        let baseline_cl = Self::creatinine_clearance(patient, cr1);
        let volume = Self::creatinine_volume(patient);
        // mL/min -> L/h, times µmol/L gives µmol/h
        let production_rate = baseline_cl * 0.06 * cr1;

        let kgfr = baseline_cl * (1.0 - (volume * (cr2 - cr1)) / (production_rate * delta_hours));

        if kgfr.is_nan() || kgfr < 0.1 {
            0.1
        } else {
            kgfr
        }
    }

    /// ke implied by a kinetic GFR for the given Vd.
    pub fn ke_from_kinetic_gfr(kgfr: f64, vd: f64) -> f64 {
        kgfr * 0.06 / vd
    }

    pub fn half_life(ke: f64) -> Option<f64> {
        if ke > 0.0 {
            Some(LN2 / ke)
        } else {
            None
        }
    }

    fn sanitize_creatinine(creatinine: f64) -> f64 {
        if creatinine.is_finite() && creatinine > 0.0 {
            creatinine.max(MIN_CREATININE)
        } else {
            FALLBACK_CREATININE
        }
    }
}
