use crate::{
    errors::VancoError,
    fitting::FALLBACK_SD_FRACTION,
    models::*,
    parameters::LN2,
    simulation::{VancoModel, MIN_MULTIPLIER},
    Result,
};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use statrs::distribution::Normal;
use statrs::statistics::{Data, OrderStatistics};

pub struct RegimenAdvisor;

impl RegimenAdvisor {
    /// Allowed dose/interval pair whose AUC24 lands closest to `target_auc`,
    /// penalised by distance from the half-life interval.
    ///
    /// Clearance is taken from `current`, the end of the latest run, so a
    /// moving creatinine is priced at the rate the patient has now.
    /// Returns `None` when that clearance is not positive.
    pub fn suggest_regimen(
        model: &VancoModel,
        current: &SimulationResult,
        target_auc: f64,
    ) -> Option<RegimenSuggestion> {
        let clearance = current.clearance;
        if !(clearance.is_finite() && clearance > 0.0) || current.vd <= 0.0 {
            log::warn!("No regimen suggested: clearance {} L/h is not usable", clearance);
            return None;
        }
        let half_life = LN2 * current.vd / clearance;
        let penalty = model.config.interval_penalty;

        let mut best: Option<(f64, RegimenSuggestion)> = None;
        for &interval in ALLOWED_INTERVALS.iter() {
            let doses_per_day = 24.0 / interval;
            let dose_estimate = target_auc * clearance / doses_per_day;
            let dose = Self::nearest_allowed_dose(dose_estimate);
            let predicted_auc = dose * doses_per_day / clearance;

            let score = (predicted_auc - target_auc).abs() + penalty * (interval - half_life).abs();
            if best.map_or(true, |(best_score, _)| score < best_score) {
                best = Some((score, RegimenSuggestion { dose, interval, predicted_auc }));
            }
        }

        best.map(|(score, suggestion)| {
            log::info!(
                "Suggested {} mg q{}h (AUC24 ~ {:.0}, score {:.1}, half-life {:.1} h)",
                suggestion.dose, suggestion.interval, suggestion.predicted_auc, score, half_life
            );
            suggestion
        })
    }

    fn nearest_allowed_dose(estimate: f64) -> f64 {
        let mut best = ALLOWED_DOSES[0];
        for &dose in ALLOWED_DOSES.iter() {
            if (dose - estimate).abs() < (best - estimate).abs() {
                best = dose;
            }
        }
        best
    }

    /// Steady-state peak (end of infusion) and trough (end of interval).
    pub fn steady_state_levels(
        dose: f64,
        interval: f64,
        ke: f64,
        vd: f64,
        infusion_rate: f64,
    ) -> SteadyStateLevels {
        if !(ke > 0.0 && vd > 0.0 && interval > 0.0 && infusion_rate > 0.0 && dose > 0.0) {
            return SteadyStateLevels { peak: 0.0, trough: 0.0 };
        }

        let infusion_time = (dose / infusion_rate).min(interval);
        let peak = (infusion_rate / (ke * vd)) * (1.0 - (-ke * infusion_time).exp())
            / (1.0 - (-ke * interval).exp());
        let trough = peak * (-ke * (interval - infusion_time)).exp();

        SteadyStateLevels { peak, trough }
    }

    /// Central interval of per-dose amounts reaching `target_auc` at
    /// `interval`, propagating the multiplier uncertainty by sampling.
    ///
    /// Each draw rescales the clearance in `current` by its ratio to the
    /// fitted multiplier.
    pub fn dose_interval(
        model: &VancoModel,
        current: &SimulationResult,
        target_auc: f64,
        interval: f64,
        level: f64,
        samples: usize,
        seed: u64,
    ) -> Result<(f64, f64)> {
        if !(level > 0.0 && level < 1.0) {
            return Err(VancoError::ConfigError(format!(
                "Confidence level must lie in (0, 1), got {}", level
            )));
        }
        if !(interval > 0.0) {
            return Err(VancoError::InvalidDosing(format!("Interval must be positive, got {}", interval)));
        }

        let sd = model
            .multiplier_sd
            .unwrap_or(FALLBACK_SD_FRACTION * model.ke_multiplier);
        let distribution = Normal::new(model.ke_multiplier, sd)
            .map_err(|e| VancoError::CalculationError(format!("Multiplier distribution: {}", e)))?;
        let mut rng = StdRng::seed_from_u64(seed);
        let fitted = model.ke_multiplier.max(MIN_MULTIPLIER);

        let doses: Vec<f64> = (0..samples)
            .map(|_| distribution.sample(&mut rng))
            .filter(|&m| m > 0.0)
            .map(|m| target_auc * current.clearance * (m / fitted) * interval / 24.0)
            .collect();

        if doses.is_empty() {
            return Err(VancoError::InsufficientData(
                "No positive multiplier draws for dose interval".to_string()
            ));
        }

        let mut data = Data::new(doses);
        let tail = (1.0 - level) / 2.0;
        Ok((data.quantile(tail), data.quantile(1.0 - tail)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn normal_model() -> VancoModel {
        VancoModel::new(0.09, 56.0, SimulationConfig::default())
    }

    /// End-of-run state with elimination held at `ke`.
    fn current(ke: f64, vd: f64) -> SimulationResult {
        SimulationResult {
            time: vec![0.0],
            concentration: vec![0.0],
            elimination_rates: vec![ke],
            auc24: 0.0,
            ke,
            vd,
            half_life: LN2 / ke,
            clearance: ke * vd,
            multiplier: 1.0,
            mode: EliminationMode::Crcl,
            nan_fallback_steps: 0,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_suggestion_for_normal_renal_function() {
        let suggestion = RegimenAdvisor::suggest_regimen(&normal_model(), &current(0.09, 56.0), 500.0).unwrap();

        assert!(ALLOWED_DOSES.contains(&suggestion.dose));
        assert!(ALLOWED_INTERVALS.contains(&suggestion.interval));
        assert!((suggestion.predicted_auc - 500.0).abs() <= 75.0);
        assert_eq!(suggestion.interval, 12.0);
        assert_eq!(suggestion.dose, 1250.0);
    }

    #[test]
    fn test_slow_clearance_extends_interval() {
        let suggestion = RegimenAdvisor::suggest_regimen(&normal_model(), &current(0.02, 60.0), 500.0).unwrap();
        assert!(suggestion.interval >= 24.0);
    }

    #[test]
    fn test_no_suggestion_without_clearance() {
        assert!(RegimenAdvisor::suggest_regimen(&normal_model(), &current(0.0, 56.0), 500.0).is_none());
    }

    #[test]
    fn test_nearest_allowed_dose_ties_go_low() {
        assert_eq!(RegimenAdvisor::nearest_allowed_dose(625.0), 500.0);
        assert_eq!(RegimenAdvisor::nearest_allowed_dose(10.0), 250.0);
        assert_eq!(RegimenAdvisor::nearest_allowed_dose(9000.0), 2500.0);
    }

    #[test]
    fn test_steady_state_levels() {
        let levels = RegimenAdvisor::steady_state_levels(1000.0, 12.0, 0.1, 50.0, 1000.0);
        let expected_peak = (1000.0 / 5.0) * (1.0 - (-0.1_f64).exp()) / (1.0 - (-1.2_f64).exp());
        assert_relative_eq!(levels.peak, expected_peak, epsilon = 1e-9);
        assert_relative_eq!(levels.trough, expected_peak * (-1.1_f64).exp(), epsilon = 1e-9);
        assert!(levels.trough < levels.peak);

        let degenerate = RegimenAdvisor::steady_state_levels(1000.0, 12.0, 0.0, 50.0, 1000.0);
        assert_eq!(degenerate, SteadyStateLevels { peak: 0.0, trough: 0.0 });
    }

    #[test]
    fn test_dose_interval_brackets_point_estimate() {
        let mut model = normal_model();
        model.multiplier_sd = Some(0.1);
        let state = current(0.09, 56.0);
        let (lo, hi) = RegimenAdvisor::dose_interval(&model, &state, 500.0, 12.0, 0.5, 2000, 42).unwrap();

        let point = 500.0 * state.clearance * 12.0 / 24.0;
        assert!(lo < point && point < hi);

        // Doses follow the current clearance, not the model's population ke
        let slower = current(0.03, 56.0);
        let (slow_lo, slow_hi) = RegimenAdvisor::dose_interval(&model, &slower, 500.0, 12.0, 0.5, 2000, 42).unwrap();
        assert!(slow_hi < lo);
        assert_relative_eq!(slow_lo / lo, 0.03 / 0.09, epsilon = 1e-9);
    }
}
