use crate::{models::*, Result};
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Everything one CLI run produces, in the shape written to `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub patient: Patient,
    pub sim_start: NaiveDateTime,
    pub population: PkParameters,
    pub fit: Option<FitResult>,
    pub multiplier_ci: Option<(f64, f64)>,
    pub result: SimulationResult,
    /// (lower, upper) concentration trajectories at the CI bounds
    pub band: Option<(SimulationResult, SimulationResult)>,
    pub trial: Option<SimulationResult>,
    pub suggestion: Option<RegimenSuggestion>,
    pub steady_state: Option<SteadyStateLevels>,
    pub dose_interval: Option<(f64, f64)>,
    /// Creatinine sampled on `result.time`
    pub creatinine: Vec<CreatinineReading>,
}

#[derive(Debug, Serialize)]
struct TrajectoryRow {
    hour: f64,
    datetime: String,
    concentration: f64,
    lower: Option<f64>,
    upper: Option<f64>,
    creatinine: Option<f64>,
    kinetic_gfr: Option<f64>,
    ke: f64,
}

pub struct OutputManager;

impl OutputManager {
    pub fn save_results<P: AsRef<Path>>(report: &SimulationReport, output_path: P) -> Result<()> {
        let output_dir = output_path.as_ref();
        fs::create_dir_all(output_dir)?;

        Self::save_trajectory(report, output_dir)?;
        Self::save_json_summary(report, output_dir)?;
        Self::generate_report(report, output_dir)?;

        log::info!("Results saved to: {}", output_dir.display());
        Ok(())
    }

    fn save_trajectory(report: &SimulationReport, output_dir: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(output_dir.join("trajectory.csv"))?;
        let result = &report.result;

        for (i, (&hour, &concentration)) in result.time.iter().zip(&result.concentration).enumerate() {
            let datetime = report.sim_start + Duration::milliseconds((hour * 3_600_000.0).round() as i64);
            let reading = report.creatinine.get(i);

            writer.serialize(TrajectoryRow {
                hour,
                datetime: datetime.format("%Y-%m-%d %H:%M").to_string(),
                concentration,
                lower: report.band.as_ref().and_then(|(lo, _)| lo.concentration.get(i).copied()),
                upper: report.band.as_ref().and_then(|(_, hi)| hi.concentration.get(i).copied()),
                creatinine: reading.map(|r| r.value),
                kinetic_gfr: reading.and_then(|r| r.kinetic_gfr),
                ke: result.elimination_rates.get(i).copied().unwrap_or(result.ke),
            })?;
        }

        writer.flush()?;
        Ok(())
    }

    fn save_json_summary(report: &SimulationReport, output_dir: &Path) -> Result<()> {
        let file = File::create(output_dir.join("summary.json"))?;
        serde_json::to_writer_pretty(file, report)?;
        Ok(())
    }

    fn generate_report(report: &SimulationReport, output_dir: &Path) -> Result<()> {
        let mut file = File::create(output_dir.join("report.txt"))?;
        let result = &report.result;
        let patient = &report.patient;

        writeln!(file, "VANCOMYCIN PK FORECAST")?;
        writeln!(file, "======================")?;
        writeln!(file)?;
        writeln!(
            file,
            "Patient: {} y, {}, {:.1} kg, {:.1} cm",
            patient.age, patient.sex, patient.weight_kg, patient.height_cm
        )?;
        writeln!(file, "Simulation start: {}", report.sim_start.format("%Y-%m-%d %H:%M"))?;
        writeln!(file, "Elimination mode: {:?}", result.mode)?;
        writeln!(file)?;

        writeln!(file, "Population estimates")?;
        writeln!(file, "  CrCl: {:.1} mL/min", report.population.crcl)?;
        writeln!(file, "  ke:   {:.4} 1/h", report.population.ke)?;
        writeln!(file, "  Vd:   {:.1} L", report.population.vd)?;
        writeln!(file)?;

        match &report.fit {
            Some(fit) => {
                writeln!(file, "Bayesian fit ({} level(s))", fit.n_levels)?;
                writeln!(file, "  Multiplier: {:.3} (SD {:.3}{})", fit.multiplier, fit.sd,
                    if fit.approximate { ", approximate" } else { "" })?;
                if let Some((lo, hi)) = report.multiplier_ci {
                    writeln!(file, "  Interval:   {:.3} - {:.3}", lo, hi)?;
                }
            }
            None => writeln!(file, "No measured levels: population estimates used")?,
        }
        writeln!(file)?;

        Self::write_result_block(&mut file, "Entered regimen", result)?;
        if let Some(trial) = &report.trial {
            Self::write_result_block(&mut file, "Trial regimen", trial)?;
        }

        if let Some(s) = &report.suggestion {
            writeln!(file, "Suggested regimen: {} mg q{}h (AUC24 ~ {:.0})", s.dose, s.interval, s.predicted_auc)?;
        }
        if let Some(ss) = &report.steady_state {
            writeln!(file, "  Steady-state peak {:.1} mg/L, trough {:.1} mg/L", ss.peak, ss.trough)?;
        }
        if let Some((lo, hi)) = report.dose_interval {
            writeln!(file, "  Dose range for target: {:.0} - {:.0} mg", lo, hi)?;
        }

        if !result.warnings.is_empty() {
            writeln!(file)?;
            writeln!(file, "Warnings")?;
            for w in &result.warnings {
                writeln!(file, "  - {}", w)?;
            }
        }

        Ok(())
    }

    fn write_result_block(file: &mut File, label: &str, result: &SimulationResult) -> Result<()> {
        writeln!(file, "{}", label)?;
        writeln!(file, "  ke:        {:.4} 1/h", result.ke)?;
        writeln!(file, "  Half-life: {:.1} h", result.half_life)?;
        writeln!(file, "  Vd:        {:.1} L", result.vd)?;
        writeln!(file, "  AUC24:     {:.0} ({})", result.auc24, result.auc_status())?;
        if let Some((t, c)) = result.peak() {
            writeln!(file, "  Peak:      {:.1} mg/L at {:.1} h", c, t)?;
        }
        writeln!(file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{creatinine::CreatinineModel, SimulationContext, VancoModel};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[test]
    fn test_save_results_writes_files() {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let patient = Patient::new(70, Sex::Female, 65.0, 160.0);
        let cr = CreatinineModel::constant(start, 110.0);
        let ctx = SimulationContext::new(&patient, &cr, start, EliminationMode::Crcl);
        let model = VancoModel::from_patient(&ctx, SimulationConfig::default());
        let result = model.run(&ctx, &[Dose::new(0.0, 1000.0)], 1.0).unwrap();

        let report = SimulationReport {
            patient: patient.clone(),
            sim_start: start,
            population: PkParameters { ke: model.ke, vd: model.vd, crcl: 0.0 },
            fit: None,
            multiplier_ci: None,
            creatinine: vec![CreatinineReading::constant(110.0); result.time.len()],
            result,
            band: None,
            trial: None,
            suggestion: None,
            steady_state: None,
            dose_interval: None,
        };

        let temp_dir = TempDir::new().unwrap();
        OutputManager::save_results(&report, temp_dir.path()).unwrap();

        assert!(temp_dir.path().join("trajectory.csv").exists());
        assert!(temp_dir.path().join("summary.json").exists());
        assert!(temp_dir.path().join("report.txt").exists());

        let csv = std::fs::read_to_string(temp_dir.path().join("trajectory.csv")).unwrap();
        assert_eq!(csv.lines().count(), report.result.time.len() + 1);
    }
}
