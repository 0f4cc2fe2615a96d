use crate::{
    auc::{AucCalculator, AUC_WINDOW_HOURS},
    creatinine::CreatinineFunction,
    dosing::DoseScheduleBuilder,
    errors::VancoError,
    fitting::BayesianFitter,
    models::*,
    parameters::{ParameterCalculator, LN2},
    Result,
};
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

/// Absolute ceiling on the active elimination rate (1/h).
pub const KE_ABS_MAX: f64 = 0.17;
/// Absolute floor on the active elimination rate (1/h).
pub const KE_ABS_MIN: f64 = 0.005;
/// Rate used for a step whose active rate came out undefined (1/h).
pub const KE_NAN_FALLBACK: f64 = 0.05;
/// Smallest elimination multiplier the engine accepts.
pub const MIN_MULTIPLIER: f64 = 0.1;

/// Read-only inputs shared by every run for one patient.
#[derive(Clone, Copy)]
pub struct SimulationContext<'a> {
    pub patient: &'a Patient,
    pub creatinine: &'a dyn CreatinineFunction,
    pub sim_start: NaiveDateTime,
    pub mode: EliminationMode,
}

impl<'a> SimulationContext<'a> {
    pub fn new(
        patient: &'a Patient,
        creatinine: &'a dyn CreatinineFunction,
        sim_start: NaiveDateTime,
        mode: EliminationMode,
    ) -> Self {
        Self { patient, creatinine, sim_start, mode }
    }

    pub fn datetime_at(&self, hours: f64) -> NaiveDateTime {
        self.sim_start + Duration::milliseconds((hours * 3_600_000.0).round() as i64)
    }
}

/// Unmultiplied elimination rate at each grid point.
pub(crate) struct EliminationTrajectory {
    pub rates: Vec<f64>,
    /// Grid points where kinetic GFR was requested but unavailable
    pub kgfr_fallbacks: usize,
}

pub(crate) struct Integration {
    pub concentration: Vec<f64>,
    pub active_rates: Vec<f64>,
    pub nan_steps: usize,
}

/// Uniform grid from 0 to at least `end_hours`, returning the points and step.
pub(crate) fn time_grid(end_hours: f64, steps_per_hour: u32) -> (Vec<f64>, f64) {
    let steps_per_hour = steps_per_hour.max(1) as f64;
    let dt = 1.0 / steps_per_hour;
    let n = (end_hours.max(0.0) * steps_per_hour - 1e-9).ceil().max(0.0) as usize;
    let times = (0..=n).map(|i| i as f64 * dt).collect();
    (times, dt)
}

pub(crate) fn elimination_trajectory(
    ctx: &SimulationContext,
    times: &[f64],
    vd: f64,
) -> EliminationTrajectory {
    let mut kgfr_fallbacks = 0;

    let rates = times
        .iter()
        .map(|&t| {
            let reading = ctx.creatinine.reading_at(ctx.datetime_at(t));
            let crcl = ParameterCalculator::creatinine_clearance(ctx.patient, reading.value);
            let population_ke = ParameterCalculator::matzke_ke(crcl);

            match ctx.mode {
                EliminationMode::Crcl => population_ke,
                EliminationMode::Kgfr => match reading.kinetic_gfr {
                    Some(kgfr) => ParameterCalculator::ke_from_kinetic_gfr(kgfr, vd),
                    None => {
                        kgfr_fallbacks += 1;
                        population_ke
                    }
                },
            }
        })
        .collect();

    EliminationTrajectory { rates, kgfr_fallbacks }
}

/// Infusion input (mg/L/h) applied over each step `[t_i, t_i+1]`.
///
/// A dose runs over `[time, time + amount / rate]` and contributes in
/// proportion to its overlap with the step; overlapping doses sum.
pub(crate) fn infusion_inputs(doses: &[Dose], times: &[f64], vd: f64, infusion_rate: f64) -> Vec<f64> {
    let mut inputs = vec![0.0; times.len()];
    let concentration_rate = infusion_rate / vd;

    for dose in doses.iter().filter(|d| d.amount > 0.0) {
        let start = dose.time;
        let end = dose.time + dose.infusion_duration(infusion_rate);

        for (i, window) in times.windows(2).enumerate() {
            let (t1, t2) = (window[0], window[1]);
            if t1 >= end {
                break;
            }
            let overlap = t2.min(end) - t1.max(start);
            if overlap > 0.0 {
                inputs[i] += concentration_rate * overlap / (t2 - t1);
            }
        }
    }

    inputs
}

/// Apply the multiplier and the absolute safety band to a raw rate.
/// The flag reports an undefined rate replaced by the fallback.
pub(crate) fn active_rate(raw: f64, multiplier: f64) -> (f64, bool) {
    let ke = raw * multiplier;
    if ke.is_nan() {
        (KE_NAN_FALLBACK, true)
    } else {
        (ke.clamp(KE_ABS_MIN, KE_ABS_MAX), false)
    }
}

pub(crate) fn integrate(
    raw_rates: &[f64],
    inputs: &[f64],
    multiplier: f64,
    dt: f64,
    scheme: IntegrationScheme,
) -> Integration {
    let n = raw_rates.len();
    let mut nan_steps = 0;

    let active_rates: Vec<f64> = raw_rates
        .iter()
        .map(|&raw| {
            let (ke, was_nan) = active_rate(raw, multiplier);
            if was_nan {
                nan_steps += 1;
            }
            ke
        })
        .collect();

    let mut concentration = vec![0.0; n];
    for i in 1..n {
        let c = concentration[i - 1];
        let ke = active_rates[i - 1];
        let input = inputs[i - 1];

        let next = match scheme {
            IntegrationScheme::Euler => c + (input - ke * c) * dt,
            IntegrationScheme::Exponential => {
                let decay = (-ke * dt).exp();
                c * decay + input / ke * (1.0 - decay)
            }
        };
        concentration[i] = next.max(0.0);
    }

    Integration { concentration, active_rates, nan_steps }
}

/// Linear interpolation on sorted `xs`, holding the end values outside.
/// An undefined `x` gives NaN.
pub fn linear_interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return 0.0;
    }
    if x.is_nan() {
        return f64::NAN;
    }
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[n - 1] {
        return ys[n - 1];
    }

    let hi = xs[..n].partition_point(|&v| v < x);
    let lo = hi - 1;
    let span = xs[hi] - xs[lo];
    if span <= 0.0 {
        return ys[hi];
    }
    ys[lo] + (ys[hi] - ys[lo]) * (x - xs[lo]) / span
}

/// One-compartment vancomycin model for a single patient.
///
/// `ke` and `vd` are population values at the reference time; the fitted
/// multiplier scales every elimination rate the engine computes.
#[derive(Debug, Clone, Serialize)]
pub struct VancoModel {
    pub ke: f64,
    pub vd: f64,
    pub ke_multiplier: f64,
    pub multiplier_sd: Option<f64>,
    pub fit: Option<FitResult>,
    pub config: SimulationConfig,
}

impl VancoModel {
    pub fn new(ke: f64, vd: f64, config: SimulationConfig) -> Self {
        Self {
            ke,
            vd,
            ke_multiplier: 1.0,
            multiplier_sd: None,
            fit: None,
            config,
        }
    }

    /// Model seeded with population parameters at the context's start.
    pub fn from_patient(ctx: &SimulationContext, config: SimulationConfig) -> Self {
        let params = ParameterCalculator::pk_params_from_patient(ctx.patient, ctx.creatinine, ctx.sim_start);
        log::debug!(
            "Population parameters: ke={:.4} 1/h, Vd={:.1} L, CrCl={:.1} mL/min",
            params.ke, params.vd, params.crcl
        );
        Self::new(params.ke, params.vd, config)
    }

    /// Individual clearance (L/h).
    pub fn clearance(&self) -> f64 {
        self.ke * self.ke_multiplier * self.vd
    }

    pub fn half_life(&self) -> f64 {
        ParameterCalculator::half_life(self.ke * self.ke_multiplier).unwrap_or(f64::INFINITY)
    }

    /// Simulate `doses` over `duration_days` with the model's multiplier.
    pub fn run(&self, ctx: &SimulationContext, doses: &[Dose], duration_days: f64) -> Result<SimulationResult> {
        self.run_with_multiplier(ctx, doses, duration_days, self.ke_multiplier)
    }

    pub fn run_with_multiplier(
        &self,
        ctx: &SimulationContext,
        doses: &[Dose],
        duration_days: f64,
        multiplier: f64,
    ) -> Result<SimulationResult> {
        if !(duration_days.is_finite() && duration_days > 0.0) {
            return Err(VancoError::InvalidInput(format!(
                "Simulation duration must be positive, got {} days", duration_days
            )));
        }
        self.check_volume()?;
        let multiplier = multiplier.max(MIN_MULTIPLIER);

        let (times, dt) = time_grid(duration_days * 24.0, self.config.steps_per_hour);
        let trajectory = elimination_trajectory(ctx, &times, self.vd);
        let mut warnings = Vec::new();
        self.check_kinetic_gfr(ctx, &trajectory, times.len(), &mut warnings)?;

        let inputs = infusion_inputs(doses, &times, self.vd, self.config.infusion_rate);
        let integration = integrate(&trajectory.rates, &inputs, multiplier, dt, self.config.scheme);

        if integration.nan_steps > 0 {
            let message = format!(
                "Elimination rate undefined at {} steps; {} 1/h used instead",
                integration.nan_steps, KE_NAN_FALLBACK
            );
            log::warn!("{}", message);
            warnings.push(message);
        }

        let auc24 = AucCalculator::trailing_auc(&times, &integration.concentration, AUC_WINDOW_HOURS)?;
        let ke = integration.active_rates.last().copied().unwrap_or(KE_NAN_FALLBACK);

        log::info!(
            "Simulated {} doses over {:.1} days: AUC24={:.0}, final ke={:.4} 1/h",
            doses.len(), duration_days, auc24, ke
        );

        Ok(SimulationResult {
            time: times,
            concentration: integration.concentration,
            elimination_rates: integration.active_rates,
            auc24,
            ke,
            vd: self.vd,
            half_life: LN2 / ke,
            clearance: ke * self.vd,
            multiplier,
            mode: ctx.mode,
            nan_fallback_steps: integration.nan_steps,
            warnings,
        })
    }

    /// Standing regimen from `start` through `end`, simulated from the
    /// context's start.
    pub fn simulate_regimen(
        &self,
        ctx: &SimulationContext,
        dose: f64,
        interval: f64,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<SimulationResult> {
        let doses = DoseScheduleBuilder::build_ordered_doses(dose, interval, start, ctx.sim_start, end)?;
        let duration_days = hours_between(ctx.sim_start, end) / 24.0;
        self.run(ctx, &doses, duration_days)
    }

    /// Concentrations at arbitrary hours since start.
    pub fn predict_at_times(&self, ctx: &SimulationContext, doses: &[Dose], hours: &[f64]) -> Result<Vec<f64>> {
        let horizon = hours.iter().copied().fold(0.0_f64, f64::max);
        let result = self.run(ctx, doses, (horizon + 1.0) / 24.0)?;
        Ok(hours.iter().map(|&h| result.concentration_at(h)).collect())
    }

    /// Calibrate the multiplier against measured levels and keep it.
    pub fn fit_ke_from_levels(
        &mut self,
        ctx: &SimulationContext,
        doses: &[Dose],
        levels: &[MeasuredLevel],
        duration_days: f64,
    ) -> Result<FitResult> {
        self.check_volume()?;
        let fit = BayesianFitter::fit(ctx, doses, levels, duration_days, self.vd, &self.config)?;

        self.ke_multiplier = fit.multiplier.max(MIN_MULTIPLIER);
        self.multiplier_sd = Some(fit.sd);
        self.fit = Some(fit.clone());
        Ok(fit)
    }

    /// Multiplier interval at `level` (e.g. 0.5 or 0.95).
    pub fn compute_ci(&self, level: f64) -> Result<(f64, f64)> {
        let sd = self.multiplier_sd.unwrap_or(0.2 * self.ke_multiplier);
        BayesianFitter::confidence_interval(self.ke_multiplier, sd, level)
    }

    /// Trajectories at the interval's bounds: (lower concentrations,
    /// upper concentrations). The high multiplier gives the lower curve.
    pub fn confidence_band(
        &self,
        ctx: &SimulationContext,
        doses: &[Dose],
        duration_days: f64,
        level: f64,
    ) -> Result<(SimulationResult, SimulationResult)> {
        let (lo, hi) = self.compute_ci(level)?;
        let lower = self.run_with_multiplier(ctx, doses, duration_days, hi)?;
        let upper = self.run_with_multiplier(ctx, doses, duration_days, lo)?;
        Ok((lower, upper))
    }

    fn check_volume(&self) -> Result<()> {
        if self.vd.is_finite() && self.vd > 0.0 {
            Ok(())
        } else {
            Err(VancoError::CalculationError(format!(
                "Volume of distribution must be positive, got {}", self.vd
            )))
        }
    }

    fn check_kinetic_gfr(
        &self,
        ctx: &SimulationContext,
        trajectory: &EliminationTrajectory,
        n_points: usize,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        if ctx.mode != EliminationMode::Kgfr || trajectory.kgfr_fallbacks == 0 {
            return Ok(());
        }

        let message = format!(
            "Kinetic GFR unavailable at {} of {} time points; population clearance used",
            trajectory.kgfr_fallbacks, n_points
        );
        if self.config.require_kinetic_gfr {
            return Err(VancoError::ConfigError(format!(
                "{} (kinetic GFR needs two creatinine values and patient data)", message
            )));
        }
        log::warn!("{}", message);
        warnings.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::creatinine::CreatinineModel;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn patient() -> Patient {
        Patient::new(65, Sex::Male, 80.0, 175.0)
    }

    #[test]
    fn test_time_grid() {
        let (times, dt) = time_grid(2.0, 12);
        assert_eq!(times.len(), 25);
        assert_relative_eq!(dt, 1.0 / 12.0);
        assert_relative_eq!(*times.last().unwrap(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_infusion_inputs_deliver_full_dose() {
        let (times, dt) = time_grid(4.0, 12);
        let vd = 50.0;
        let inputs = infusion_inputs(&[Dose::new(0.5, 1500.0)], &times, vd, 1000.0);

        let delivered: f64 = inputs.iter().map(|r| r * dt * vd).sum();
        assert_relative_eq!(delivered, 1500.0, epsilon = 1e-6);
        assert_relative_eq!(inputs[6], 1000.0 / vd, epsilon = 1e-9);
        assert_eq!(inputs[0], 0.0);
    }

    #[test]
    fn test_overlapping_infusions_sum() {
        let (times, _) = time_grid(3.0, 12);
        let inputs = infusion_inputs(&[Dose::new(0.0, 1000.0), Dose::new(0.0, 1000.0)], &times, 50.0, 1000.0);
        assert_relative_eq!(inputs[3], 40.0, epsilon = 1e-9);
    }

    #[test]
    fn test_active_rate_band_and_nan() {
        assert_eq!(active_rate(1.0, 1.0), (KE_ABS_MAX, false));
        assert_eq!(active_rate(0.0001, 1.0), (KE_ABS_MIN, false));
        assert_eq!(active_rate(f64::NAN, 1.0), (KE_NAN_FALLBACK, true));
        assert_eq!(active_rate(0.08, 1.0), (0.08, false));
    }

    #[test]
    fn test_nan_step_does_not_corrupt_trajectory() {
        let mut raw = vec![0.08; 50];
        raw[10] = f64::NAN;
        let inputs = vec![0.0; 50];
        let mut seeded = inputs.clone();
        seeded[0] = 120.0;

        let integration = integrate(&raw, &seeded, 1.0, 0.1, IntegrationScheme::Euler);
        assert_eq!(integration.nan_steps, 1);
        assert!(integration.concentration.iter().all(|c| c.is_finite() && *c >= 0.0));
    }

    #[test]
    fn test_exponential_scheme_close_to_euler() {
        let cr = CreatinineModel::constant(t0(), 100.0);
        let p = patient();
        let ctx = SimulationContext::new(&p, &cr, t0(), EliminationMode::Crcl);
        let doses = [Dose::new(0.0, 1000.0), Dose::new(12.0, 1000.0)];

        let euler = VancoModel::from_patient(&ctx, SimulationConfig::default());
        let exact = VancoModel::from_patient(
            &ctx,
            SimulationConfig { scheme: IntegrationScheme::Exponential, ..SimulationConfig::default() },
        );

        let a = euler.run(&ctx, &doses, 2.0).unwrap();
        let b = exact.run(&ctx, &doses, 2.0).unwrap();
        for (ca, cb) in a.concentration.iter().zip(&b.concentration) {
            assert!((ca - cb).abs() < 0.1);
        }
    }

    #[test]
    fn test_linear_interpolate() {
        let xs = [0.0, 1.0, 2.0];
        let ys = [0.0, 10.0, 30.0];
        assert_eq!(linear_interpolate(&xs, &ys, -1.0), 0.0);
        assert_relative_eq!(linear_interpolate(&xs, &ys, 0.5), 5.0);
        assert_relative_eq!(linear_interpolate(&xs, &ys, 1.5), 20.0);
        assert_eq!(linear_interpolate(&xs, &ys, 5.0), 30.0);
        assert!(linear_interpolate(&xs, &ys, f64::NAN).is_nan());
    }

    #[test]
    fn test_concentration_at_undefined_hour() {
        let cr = CreatinineModel::constant(t0(), 100.0);
        let p = patient();
        let ctx = SimulationContext::new(&p, &cr, t0(), EliminationMode::Crcl);
        let model = VancoModel::from_patient(&ctx, SimulationConfig::default());
        let result = model.run(&ctx, &[Dose::new(0.0, 1000.0)], 1.0).unwrap();

        assert!(result.concentration_at(f64::NAN).is_nan());
        assert!(result.concentration_at(2.0) > 0.0);
    }

    #[test]
    fn test_rejects_non_positive_duration() {
        let cr = CreatinineModel::constant(t0(), 100.0);
        let p = patient();
        let ctx = SimulationContext::new(&p, &cr, t0(), EliminationMode::Crcl);
        let model = VancoModel::from_patient(&ctx, SimulationConfig::default());
        assert!(model.run(&ctx, &[], 0.0).is_err());
    }

    #[test]
    fn test_kgfr_fallback_is_signalled() {
        // No patient attached, so the creatinine model cannot give kinetic GFR
        let series = [
            CreatinineMeasurement { time: t0(), value: 100.0 },
            CreatinineMeasurement { time: t0() + Duration::hours(24), value: 150.0 },
        ];
        let cr = CreatinineModel::build(&series, None, 1.0, None).unwrap();
        let p = patient();
        let ctx = SimulationContext::new(&p, &cr, t0(), EliminationMode::Kgfr);

        let lenient = VancoModel::from_patient(&ctx, SimulationConfig::default());
        let result = lenient.run(&ctx, &[Dose::new(0.0, 1000.0)], 1.0).unwrap();
        assert_eq!(result.warnings.len(), 1);

        let strict = VancoModel::from_patient(
            &ctx,
            SimulationConfig { require_kinetic_gfr: true, ..SimulationConfig::default() },
        );
        let err = strict.run(&ctx, &[Dose::new(0.0, 1000.0)], 1.0);
        assert!(matches!(err, Err(VancoError::ConfigError(_))));
    }

    #[test]
    fn test_kgfr_mode_uses_kinetic_rate() {
        let p = patient();
        let series = [
            CreatinineMeasurement { time: t0(), value: 100.0 },
            CreatinineMeasurement { time: t0() + Duration::hours(48), value: 200.0 },
        ];
        let cr = CreatinineModel::build(&series, None, 1.0, Some(&p)).unwrap();
        let ctx = SimulationContext::new(&p, &cr, t0(), EliminationMode::Kgfr);
        let model = VancoModel::from_patient(&ctx, SimulationConfig::default());

        let result = model.run(&ctx, &[Dose::new(0.0, 1000.0)], 1.0).unwrap();
        let kgfr = ParameterCalculator::kinetic_gfr(&p, 100.0, 200.0, 48.0);
        let expected = ParameterCalculator::ke_from_kinetic_gfr(kgfr, model.vd).clamp(KE_ABS_MIN, KE_ABS_MAX);

        assert!(result.warnings.is_empty());
        assert_relative_eq!(result.ke, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_elimination_mode_comes_from_context() {
        let p = patient();
        let series = [
            CreatinineMeasurement { time: t0(), value: 100.0 },
            CreatinineMeasurement { time: t0() + Duration::hours(48), value: 200.0 },
        ];
        let cr = CreatinineModel::build(&series, None, 1.0, Some(&p)).unwrap();
        let crcl_ctx = SimulationContext::new(&p, &cr, t0(), EliminationMode::Crcl);
        let kgfr_ctx = SimulationContext::new(&p, &cr, t0(), EliminationMode::Kgfr);
        let model = VancoModel::from_patient(&crcl_ctx, SimulationConfig::default());

        let crcl = model.run(&crcl_ctx, &[Dose::new(0.0, 1000.0)], 1.0).unwrap();
        let kgfr = model.run(&kgfr_ctx, &[Dose::new(0.0, 1000.0)], 1.0).unwrap();

        assert_eq!(crcl.mode, EliminationMode::Crcl);
        assert_eq!(kgfr.mode, EliminationMode::Kgfr);
        let at_day_one = ParameterCalculator::creatinine_clearance(&p, 150.0);
        assert_relative_eq!(crcl.ke, ParameterCalculator::matzke_ke(at_day_one), epsilon = 1e-9);
        let kinetic = ParameterCalculator::kinetic_gfr(&p, 100.0, 200.0, 48.0);
        assert_relative_eq!(kgfr.ke, ParameterCalculator::ke_from_kinetic_gfr(kinetic, model.vd), epsilon = 1e-9);
    }
}
