use crate::{
    errors::VancoError,
    models::*,
    simulation::{elimination_trajectory, infusion_inputs, integrate, linear_interpolate, time_grid, SimulationContext},
    Result,
};
use statrs::distribution::{ContinuousCDF, Normal};

/// Fraction of the multiplier used as SD when the posterior curvature is unusable.
pub const FALLBACK_SD_FRACTION: f64 = 0.2;
/// Lowest multiplier a confidence bound may report.
pub const MIN_CI_MULTIPLIER: f64 = 0.1;

pub struct BayesianFitter;

impl BayesianFitter {
    /// Grid-search MAP estimate of the elimination multiplier.
    ///
    /// The unmultiplied elimination trajectory is computed once; each
    /// candidate reuses it. The prior is Gaussian around 1.0 and the
    /// likelihood Gaussian with a fixed measurement SD.
    pub fn fit(
        ctx: &SimulationContext,
        doses: &[Dose],
        levels: &[MeasuredLevel],
        duration_days: f64,
        vd: f64,
        config: &SimulationConfig,
    ) -> Result<FitResult> {
        if levels.is_empty() {
            return Err(VancoError::InsufficientData(
                "At least one measured level is required for fitting".to_string()
            ));
        }
        let (lower, upper, points) = config.multiplier_grid;
        if points < 3 || !(lower > 0.0 && upper > lower) {
            return Err(VancoError::ConfigError(format!(
                "Invalid multiplier grid {:?}", config.multiplier_grid
            )));
        }

        let offsets = Self::level_offsets(ctx, levels)?;
        let observed: Vec<f64> = levels.iter().map(|l| l.value).collect();

        let horizon = offsets.iter().copied().fold(duration_days.max(0.0) * 24.0, f64::max);
        let (times, dt) = time_grid(horizon, config.steps_per_hour);
        let trajectory = elimination_trajectory(ctx, &times, vd);
        if ctx.mode == EliminationMode::Kgfr && trajectory.kgfr_fallbacks > 0 {
            log::warn!(
                "Fitting with population clearance at {} time points (kinetic GFR unavailable)",
                trajectory.kgfr_fallbacks
            );
        }
        let inputs = infusion_inputs(doses, &times, vd, config.infusion_rate);

        let step = (upper - lower) / (points - 1) as f64;
        let candidates: Vec<f64> = (0..points).map(|i| lower + i as f64 * step).collect();

        let log_posterior: Vec<f64> = candidates
            .iter()
            .map(|&m| {
                let conc = integrate(&trajectory.rates, &inputs, m, dt, config.scheme).concentration;
                let predicted: Vec<f64> = offsets
                    .iter()
                    .map(|&t| linear_interpolate(&times, &conc, t))
                    .collect();
                Self::log_posterior(&observed, &predicted, m, config)
            })
            .collect();

        let best = Self::argmax(&log_posterior);
        let multiplier = candidates[best];
        let (sd, approximate) = Self::curvature_sd(&log_posterior, best, step, multiplier);

        if approximate {
            log::warn!(
                "Posterior curvature unusable at multiplier {:.3}; SD set to {:.0}% of multiplier",
                multiplier,
                FALLBACK_SD_FRACTION * 100.0
            );
        }
        log::info!(
            "Fitted elimination multiplier {:.3} (SD {:.3}) from {} level(s)",
            multiplier, sd, levels.len()
        );

        Ok(FitResult {
            multiplier,
            sd,
            approximate,
            n_levels: levels.len(),
            log_posterior: log_posterior[best],
        })
    }

    fn level_offsets(ctx: &SimulationContext, levels: &[MeasuredLevel]) -> Result<Vec<f64>> {
        levels
            .iter()
            .map(|level| {
                if !(level.value.is_finite() && level.value >= 0.0) {
                    return Err(VancoError::InvalidInput(format!(
                        "Measured level at {} is not a valid concentration: {}",
                        level.time, level.value
                    )));
                }
                let offset = hours_between(ctx.sim_start, level.time);
                if offset < 0.0 {
                    return Err(VancoError::InvalidInput(format!(
                        "Measured level at {} precedes simulation start {}",
                        level.time, ctx.sim_start
                    )));
                }
                Ok(offset)
            })
            .collect()
    }

    pub fn log_posterior(observed: &[f64], predicted: &[f64], multiplier: f64, config: &SimulationConfig) -> f64 {
        let sigma2 = config.measurement_sd * config.measurement_sd;
        let log_likelihood: f64 = observed
            .iter()
            .zip(predicted)
            .map(|(o, p)| -(o - p).powi(2) / (2.0 * sigma2))
            .sum();
        let log_prior = -(multiplier - 1.0).powi(2) / (2.0 * config.prior_sd * config.prior_sd);

        log_likelihood + log_prior
    }

    /// First index of the maximum.
    fn argmax(values: &[f64]) -> usize {
        let mut best = 0;
        for (i, &v) in values.iter().enumerate() {
            if v > values[best] {
                best = i;
            }
        }
        best
    }

    /// SD from the second difference of the log-posterior at `idx`
    /// (nearest interior point at the grid edges).
    fn curvature_sd(log_posterior: &[f64], idx: usize, step: f64, multiplier: f64) -> (f64, bool) {
        let i = idx.clamp(1, log_posterior.len() - 2);
        let second = (log_posterior[i + 1] - 2.0 * log_posterior[i] + log_posterior[i - 1]) / (step * step);

        if second.is_finite() && second < 0.0 {
            ((-1.0 / second).sqrt(), false)
        } else {
            (FALLBACK_SD_FRACTION * multiplier, true)
        }
    }

    /// Two-sided normal z-score for a central interval at `level`.
    pub fn z_score(level: f64) -> Result<f64> {
        if !(level > 0.0 && level < 1.0) {
            return Err(VancoError::ConfigError(format!(
                "Confidence level must lie in (0, 1), got {}", level
            )));
        }
        let standard = Normal::new(0.0, 1.0)
            .map_err(|e| VancoError::CalculationError(format!("Standard normal: {}", e)))?;
        Ok(standard.inverse_cdf(0.5 + level / 2.0))
    }

    /// Symmetric interval around `multiplier`, each bound floored at 0.1.
    pub fn confidence_interval(multiplier: f64, sd: f64, level: f64) -> Result<(f64, f64)> {
        let z = Self::z_score(level)?;
        let lo = (multiplier - z * sd).max(MIN_CI_MULTIPLIER);
        let hi = (multiplier + z * sd).max(MIN_CI_MULTIPLIER);
        Ok((lo, hi))
    }
}
