use crate::Result;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub struct ExampleDataGenerator;

impl ExampleDataGenerator {
    /// Write a three-day event file: worsening creatinine, 1 g q12h and two
    /// measured levels around the fourth dose.
    pub fn generate_events<P: AsRef<Path>>(output_path: P) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(42); // Reproducible results
        let mut file = File::create(output_path)?;

        writeln!(file, "DATETIME,EVENT,VALUE")?;

        let start = Self::example_start();
        let mut rows: Vec<(NaiveDateTime, &str, f64)> = Vec::new();

        let baseline = rng.gen_range(80.0..110.0_f64).round();
        for day in 0..3 {
            let rise = 1.0 + 0.25 * day as f64 + rng.gen_range(-0.03..0.03);
            rows.push((start + Duration::hours(24 * day), "CREAT", (baseline * rise).round()));
        }

        for k in 0..6 {
            let time = start + Duration::minutes(90) + Duration::hours(12 * k);
            rows.push((time, "DOSE", 1000.0));
        }

        // Peak and trough around the fourth dose (37.5 h)
        let peak = rng.gen_range(24.0..30.0_f64);
        let trough = rng.gen_range(11.0..15.0_f64);
        rows.push((start + Duration::minutes(39 * 60 + 30), "LEVEL", (peak * 10.0).round() / 10.0));
        rows.push((start + Duration::minutes(49 * 60), "LEVEL", (trough * 10.0).round() / 10.0));

        rows.sort_by_key(|(time, _, _)| *time);
        for (time, event, value) in &rows {
            writeln!(file, "{},{},{}", time.format("%Y-%m-%d %H:%M"), event, value)?;
        }

        log::info!("Generated example event file with {} rows", rows.len());
        Ok(())
    }

    pub fn example_start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(8, 0, 0))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::EventParser;
    use tempfile::TempDir;

    #[test]
    fn test_generated_events_parse() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("events.csv");
        ExampleDataGenerator::generate_events(&path).unwrap();

        let events = EventParser::parse_events(&path).unwrap();
        assert_eq!(events.creatinine.len(), 3);
        assert_eq!(events.dose_times.len(), 6);
        assert_eq!(events.levels.len(), 2);
        assert!(events.creatinine[2].value > events.creatinine[0].value);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.csv");
        let b = temp_dir.path().join("b.csv");
        ExampleDataGenerator::generate_events(&a).unwrap();
        ExampleDataGenerator::generate_events(&b).unwrap();
        assert_eq!(std::fs::read_to_string(a).unwrap(), std::fs::read_to_string(b).unwrap());
    }
}
