use crate::{errors::VancoError, models::*, Result};
use chrono::NaiveDateTime;
use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Clinical events recorded for one patient, in file order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientEvents {
    pub creatinine: Vec<CreatinineMeasurement>,
    pub dose_times: Vec<NaiveDateTime>,
    pub dose_amounts: Vec<f64>,
    pub levels: Vec<MeasuredLevel>,
}

impl PatientEvents {
    pub fn earliest(&self) -> Option<NaiveDateTime> {
        self.creatinine
            .iter()
            .map(|c| c.time)
            .chain(self.dose_times.iter().copied())
            .chain(self.levels.iter().map(|l| l.time))
            .min()
    }
}

#[derive(Debug, Deserialize)]
struct EventRow {
    #[serde(rename = "DATETIME")]
    datetime: String,
    #[serde(rename = "EVENT")]
    event: String,
    #[serde(rename = "VALUE")]
    value: f64,
}

pub struct EventParser;

impl EventParser {
    /// Read a `DATETIME,EVENT,VALUE` file where EVENT is CREAT, DOSE or LEVEL.
    pub fn parse_events<P: AsRef<Path>>(file_path: P) -> Result<PatientEvents> {
        let file = File::open(file_path)?;
        Self::parse_reader(file)
    }

    pub fn parse_reader<R: Read>(reader: R) -> Result<PatientEvents> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_reader(reader);

        let mut events = PatientEvents::default();

        for (line, result) in reader.deserialize::<EventRow>().enumerate() {
            let row = result?;
            let time = Self::parse_datetime(&row.datetime)
                .map_err(|e| VancoError::ParseError(format!("Row {}: {}", line + 1, e)))?;

            match row.event.to_uppercase().as_str() {
                "CREAT" | "CR" | "CREATININE" => {
                    events.creatinine.push(CreatinineMeasurement { time, value: row.value });
                }
                "DOSE" => {
                    events.dose_times.push(time);
                    events.dose_amounts.push(row.value);
                }
                "LEVEL" => {
                    events.levels.push(MeasuredLevel { time, value: row.value });
                }
                other => {
                    return Err(VancoError::ParseError(format!(
                        "Row {}: unknown event type {}", line + 1, other
                    )));
                }
            }
        }

        log::info!(
            "Loaded {} creatinine values, {} doses, {} levels",
            events.creatinine.len(),
            events.dose_times.len(),
            events.levels.len()
        );
        Ok(events)
    }

    pub fn parse_datetime(value: &str) -> Result<NaiveDateTime> {
        DATETIME_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(value.trim(), format).ok())
            .ok_or_else(|| VancoError::ParseError(format!("Invalid datetime: {}", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_events() {
        let data = "\
DATETIME,EVENT,VALUE
2024-03-01 08:00,CREAT,95
2024-03-01 09:30,DOSE,1250
2024-03-01 21:30,DOSE,1000
2024-03-02 08:00,creat,130
2024-03-02 09:00,LEVEL,14.2
";
        let events = EventParser::parse_reader(data.as_bytes()).unwrap();

        assert_eq!(events.creatinine.len(), 2);
        assert_eq!(events.dose_amounts, vec![1250.0, 1000.0]);
        assert_eq!(events.levels.len(), 1);
        assert_eq!(events.levels[0].value, 14.2);

        let first = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(8, 0, 0).unwrap();
        assert_eq!(events.earliest(), Some(first));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let data = "DATETIME,EVENT,VALUE\n2024-03-01 08:00,WEIGHT,80\n";
        assert!(matches!(EventParser::parse_reader(data.as_bytes()), Err(VancoError::ParseError(_))));
    }

    #[test]
    fn test_datetime_formats() {
        assert!(EventParser::parse_datetime("2024-03-01 08:00").is_ok());
        assert!(EventParser::parse_datetime("2024-03-01T08:00:00").is_ok());
        assert!(EventParser::parse_datetime("01/03/2024").is_err());
    }
}
