use std::fmt;

#[derive(Debug)]
pub enum QcError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (bad tolerance, duplicate measure, etc.).
    ConfigValidation(String),
    /// One of the matching columns is absent from an input table.
    MissingKeyColumn { side: String, column: String },
    /// A measure or fiscal-year column is absent from an input table.
    MissingColumn { side: String, column: String },
    /// Non-numeric text in a numeric column.
    InvalidNumber { side: String, row: usize, column: String, value: String },
    /// Year-over-year labeling needs exactly one fiscal year per table.
    MixedFiscalYears { side: String, values: Vec<String> },
    /// Both sides resolve to the same suffix label.
    SideLabelConflict(String),
    /// Selection references a name that is neither a differenced measure nor a group.
    UnknownMeasure(String),
    /// Operator threshold override rejected.
    InvalidOverride { measure: String, reason: String },
    /// Row width doesn't match the header row.
    RaggedRow { row: usize, expected: usize, found: usize },
    /// CSV read/write error.
    Csv(String),
    /// IO error (file read, etc.).
    Io(String),
}

impl fmt::Display for QcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::MissingKeyColumn { side, column } => {
                write!(f, "{side} table: missing key column '{column}'")
            }
            Self::MissingColumn { side, column } => {
                write!(f, "{side} table: missing column '{column}'")
            }
            Self::InvalidNumber { side, row, column, value } => {
                write!(f, "{side} table, row {row}: column '{column}' is not numeric: '{value}'")
            }
            Self::MixedFiscalYears { side, values } if values.is_empty() => {
                write!(f, "{side} table: no fiscal year value found")
            }
            Self::MixedFiscalYears { side, values } => {
                write!(f, "{side} table: expected one fiscal year, found {}", values.join(", "))
            }
            Self::SideLabelConflict(label) => {
                write!(f, "both tables resolve to the same label '{label}'")
            }
            Self::UnknownMeasure(name) => write!(f, "unknown measure or group: {name}"),
            Self::InvalidOverride { measure, reason } => {
                write!(f, "invalid threshold override for '{measure}': {reason}")
            }
            Self::RaggedRow { row, expected, found } => {
                write!(f, "row {row}: expected {expected} field(s), found {found}")
            }
            Self::Csv(msg) => write!(f, "CSV error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for QcError {}

impl From<csv::Error> for QcError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e.to_string())
    }
}

impl From<std::io::Error> for QcError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
