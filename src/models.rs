use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lower bound of the AUC24 therapeutic band (mg·h/L).
pub const AUC_TARGET_LOW: f64 = 400.0;
/// Upper bound of the AUC24 therapeutic band (mg·h/L).
pub const AUC_TARGET_HIGH: f64 = 600.0;

/// Dosing intervals the advisor may propose (hours).
pub const ALLOWED_INTERVALS: [f64; 8] = [6.0, 8.0, 12.0, 18.0, 24.0, 36.0, 48.0, 72.0];
/// Dose amounts the advisor may propose (mg).
pub const ALLOWED_DOSES: [f64; 10] = [
    250.0, 500.0, 750.0, 1000.0, 1250.0, 1500.0, 1750.0, 2000.0, 2250.0, 2500.0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// Cockcroft-Gault sex coefficient.
    pub fn clearance_factor(&self) -> f64 {
        match self {
            Sex::Male => 1.0,
            Sex::Female => 0.85,
        }
    }
}

impl FromStr for Sex {
    type Err = crate::VancoError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().chars().next() {
            Some('m') => Ok(Sex::Male),
            Some('f') => Ok(Sex::Female),
            _ => Err(crate::VancoError::ParseError(format!("Unrecognised sex: {}", s))),
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sex::Male => write!(f, "Male"),
            Sex::Female => write!(f, "Female"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub age: u32,
    pub sex: Sex,
    pub weight_kg: f64,
    pub height_cm: f64,
    /// Multiplier on creatinine production (1.0 = typical muscle mass).
    pub muscle_factor: f64,
}

impl Patient {
    pub fn new(age: u32, sex: Sex, weight_kg: f64, height_cm: f64) -> Self {
        Self {
            age,
            sex,
            weight_kg,
            height_cm,
            muscle_factor: 1.0,
        }
    }

    pub fn with_muscle_factor(mut self, muscle_factor: f64) -> Self {
        self.muscle_factor = muscle_factor;
        self
    }

    /// Reject demographics no formula downstream can work with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.age < 18 {
            return Err(crate::VancoError::InvalidInput(format!(
                "Age {} is below the adult minimum of 18", self.age
            )));
        }
        if !(self.weight_kg.is_finite() && self.weight_kg > 0.0) {
            return Err(crate::VancoError::InvalidInput(format!(
                "Weight must be positive, got {}", self.weight_kg
            )));
        }
        if !(self.height_cm.is_finite() && self.height_cm > 0.0) {
            return Err(crate::VancoError::InvalidInput(format!(
                "Height must be positive, got {}", self.height_cm
            )));
        }
        if !(self.muscle_factor.is_finite() && self.muscle_factor > 0.0) {
            return Err(crate::VancoError::InvalidInput(format!(
                "Muscle factor must be positive, got {}", self.muscle_factor
            )));
        }
        if self.age > 100 || self.weight_kg < 30.0 || self.weight_kg > 200.0
            || self.height_cm < 140.0 || self.height_cm > 230.0
        {
            log::warn!("Patient demographics outside the usual adult range: {:?}", self);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreatinineMeasurement {
    pub time: NaiveDateTime,
    /// Serum creatinine (µmol/L)
    pub value: f64,
}

/// Creatinine at a point in time, with the kinetic GFR (mL/min) when the
/// model can estimate one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreatinineReading {
    pub value: f64,
    pub kinetic_gfr: Option<f64>,
}

impl CreatinineReading {
    pub fn constant(value: f64) -> Self {
        Self { value, kinetic_gfr: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dose {
    /// Hours since simulation start
    pub time: f64,
    /// Amount (mg)
    pub amount: f64,
}

impl Dose {
    pub fn new(time: f64, amount: f64) -> Self {
        Self { time, amount }
    }

    pub fn infusion_duration(&self, infusion_rate: f64) -> f64 {
        self.amount / infusion_rate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasuredLevel {
    pub time: NaiveDateTime,
    /// Serum vancomycin (mg/L)
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PkParameters {
    /// Elimination rate constant (1/h)
    pub ke: f64,
    /// Volume of distribution (L)
    pub vd: f64,
    /// Creatinine clearance (mL/min)
    pub crcl: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EliminationMode {
    /// Population ke from Cockcroft-Gault clearance at each step
    #[serde(rename = "crcl")]
    Crcl,
    /// ke from kinetic GFR where available, Cockcroft-Gault otherwise
    #[serde(rename = "kgfr")]
    Kgfr,
}

impl FromStr for EliminationMode {
    type Err = crate::VancoError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "crcl" => Ok(EliminationMode::Crcl),
            "kgfr" => Ok(EliminationMode::Kgfr),
            _ => Err(crate::VancoError::ConfigError(format!("Unknown elimination mode: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationScheme {
    /// Forward Euler
    Euler,
    /// Closed-form exponential update per step
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Hours since simulation start
    pub time: Vec<f64>,
    /// Concentration (mg/L) on `time`
    pub concentration: Vec<f64>,
    /// Active elimination rate (1/h) on `time`
    pub elimination_rates: Vec<f64>,
    pub auc24: f64,
    pub ke: f64,
    pub vd: f64,
    pub half_life: f64,
    pub clearance: f64,
    pub multiplier: f64,
    pub mode: EliminationMode,
    pub nan_fallback_steps: usize,
    pub warnings: Vec<String>,
}

impl SimulationResult {
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.time
            .iter()
            .zip(&self.concentration)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(t, c)| (*t, *c))
    }

    /// Linearly interpolated concentration at `hours` since start.
    pub fn concentration_at(&self, hours: f64) -> f64 {
        crate::simulation::linear_interpolate(&self.time, &self.concentration, hours)
    }

    pub fn auc_status(&self) -> AucStatus {
        AucStatus::classify(self.auc24)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Posterior-best elimination multiplier
    pub multiplier: f64,
    pub sd: f64,
    /// Curvature was unusable and `sd` is the 0.2×multiplier heuristic
    pub approximate: bool,
    pub n_levels: usize,
    pub log_posterior: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimenSuggestion {
    pub dose: f64,
    pub interval: f64,
    pub predicted_auc: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SteadyStateLevels {
    pub peak: f64,
    pub trough: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AucStatus {
    Below,
    InRange,
    Above,
}

impl AucStatus {
    pub fn classify(auc24: f64) -> Self {
        if auc24 < AUC_TARGET_LOW {
            AucStatus::Below
        } else if auc24 > AUC_TARGET_HIGH {
            AucStatus::Above
        } else {
            AucStatus::InRange
        }
    }
}

impl fmt::Display for AucStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AucStatus::Below => write!(f, "below target range (< {})", AUC_TARGET_LOW),
            AucStatus::InRange => write!(f, "within target range ({}-{})", AUC_TARGET_LOW, AUC_TARGET_HIGH),
            AucStatus::Above => write!(f, "above target range (> {})", AUC_TARGET_HIGH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub steps_per_hour: u32,
    /// Infusion rate (mg/h)
    pub infusion_rate: f64,
    pub scheme: IntegrationScheme,
    pub target_auc: f64,
    /// Score weight per hour of distance from the half-life interval
    pub interval_penalty: f64,
    /// Measurement error SD (mg/L)
    pub measurement_sd: f64,
    /// Prior SD of the elimination multiplier
    pub prior_sd: f64,
    /// (lower, upper, points) of the multiplier search grid
    pub multiplier_grid: (f64, f64, usize),
    pub ci_level: f64,
    /// Fail instead of falling back when kinetic GFR is unavailable
    pub require_kinetic_gfr: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            steps_per_hour: 12,
            infusion_rate: 1000.0,
            scheme: IntegrationScheme::Euler,
            target_auc: 500.0,
            interval_penalty: 5.0,
            measurement_sd: 2.0,
            prior_sd: 0.3,
            multiplier_grid: (0.3, 3.0, 100),
            ci_level: 0.5,
            require_kinetic_gfr: false,
        }
    }
}

/// Signed hours from `from` to `to`.
pub fn hours_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}
