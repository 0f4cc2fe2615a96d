use crate::{errors::VancoError, Result};

/// Length of the exposure window (hours).
pub const AUC_WINDOW_HOURS: f64 = 24.0;

pub struct AucCalculator;

impl AucCalculator {
    /// AUC over the trailing `window` hours of a trajectory.
    ///
    /// Runs shorter than the window integrate the whole trajectory.
    pub fn trailing_auc(times: &[f64], concentrations: &[f64], window: f64) -> Result<f64> {
        if times.len() != concentrations.len() {
            return Err(VancoError::CalculationError(format!(
                "{} time points for {} concentrations",
                times.len(),
                concentrations.len()
            )));
        }
        let Some(&t_end) = times.last() else {
            return Ok(0.0);
        };

        let cutoff = t_end - window;
        let start = times.partition_point(|&t| t < cutoff - 1e-9);

        Ok(Self::linear_trapezoidal(&times[start..], &concentrations[start..]))
    }

    /// Linear trapezoidal rule over paired samples.
    pub fn linear_trapezoidal(times: &[f64], concentrations: &[f64]) -> f64 {
        let mut auc = 0.0;

        for i in 1..times.len().min(concentrations.len()) {
            let t1 = times[i - 1];
            let t2 = times[i];
            let c1 = concentrations[i - 1];
            let c2 = concentrations[i];

            if t2 <= t1 {
                continue;
            }

            auc += (t2 - t1) * (c1 + c2) / 2.0;
        }

        auc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_trapezoidal() {
        let times = [0.0, 1.0, 2.0, 4.0];
        let conc = [100.0, 75.0, 50.0, 25.0];
        assert_relative_eq!(AucCalculator::linear_trapezoidal(&times, &conc), 87.5 + 62.5 + 75.0);
    }

    #[test]
    fn test_trailing_window_uses_last_24h() {
        let times: Vec<f64> = (0..=48).map(|h| h as f64).collect();
        let conc: Vec<f64> = times.iter().map(|&t| if t < 24.0 { 100.0 } else { 10.0 }).collect();

        let auc = AucCalculator::trailing_auc(&times, &conc, AUC_WINDOW_HOURS).unwrap();
        assert_relative_eq!(auc, 240.0, epsilon = 1e-9);
    }

    #[test]
    fn test_short_run_uses_whole_trajectory() {
        let times = [0.0, 6.0, 12.0];
        let conc = [10.0, 10.0, 10.0];
        let auc = AucCalculator::trailing_auc(&times, &conc, AUC_WINDOW_HOURS).unwrap();
        assert_relative_eq!(auc, 120.0);
    }

    #[test]
    fn test_mismatched_lengths() {
        assert!(AucCalculator::trailing_auc(&[0.0, 1.0], &[1.0], 24.0).is_err());
    }
}
