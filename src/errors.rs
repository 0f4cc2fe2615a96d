use thiserror::Error;

#[derive(Error, Debug)]
pub enum VancoError {
    #[error("Data parsing error: {0}")]
    ParseError(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),

    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Invalid dosing regimen: {0}")]
    InvalidDosing(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
