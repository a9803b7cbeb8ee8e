//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! | Code | Meaning                                              |
//! |------|------------------------------------------------------|
//! | 0    | Success, no outliers flagged                         |
//! | 1    | Run completed and flagged at least one outlier row   |
//! | 2    | CLI usage error (bad args, malformed --override)     |
//! | 3    | Invalid config (TOML parse or validation failure)    |
//! | 4    | Runtime error (IO, missing column, bad cell value)   |
//! | 5    | No segment pairs survived matching                   |

use pavecheck_qc::QcError;

/// Success - command completed, nothing flagged.
pub const EXIT_SUCCESS: u8 = 0;

/// Outliers found. Like `diff(1)`, exit 1 means "something to look at."
pub const EXIT_OUTLIERS: u8 = 1;

/// Usage error - bad arguments, missing required options.
/// Matches clap's own exit code for argument errors.
pub const EXIT_USAGE: u8 = 2;

/// Config could not be parsed or failed validation.
pub const EXIT_INVALID_CONFIG: u8 = 3;

/// IO or data error while loading tables or running the pipeline.
pub const EXIT_RUNTIME: u8 = 4;

/// Matching produced zero pairs; nothing to difference.
pub const EXIT_NO_MATCHES: u8 = 5;

/// Map an engine error to its exit code.
pub fn qc_exit_code(err: &QcError) -> u8 {
    match err {
        QcError::ConfigParse(_)
        | QcError::ConfigValidation(_)
        | QcError::UnknownMeasure(_)
        | QcError::InvalidOverride { .. } => EXIT_INVALID_CONFIG,
        QcError::MissingKeyColumn { .. }
        | QcError::MissingColumn { .. }
        | QcError::InvalidNumber { .. }
        | QcError::MixedFiscalYears { .. }
        | QcError::SideLabelConflict(_)
        | QcError::RaggedRow { .. }
        | QcError::Csv(_)
        | QcError::Io(_) => EXIT_RUNTIME,
    }
}
