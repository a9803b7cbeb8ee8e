//! `pavecheck-qc`: Segment matching and deviation QC for pavement-condition
//! surveys.
//!
//! Pure engine crate: receives two loaded tables, returns matched pairs,
//! per-measure deviations and outlier flags. No CLI concerns.

pub mod classify;
pub mod config;
pub mod dataset;
pub mod differ;
pub mod engine;
pub mod error;
pub mod export;
pub mod matcher;
pub mod model;
pub mod stats;
pub mod summary;
pub mod table;

pub use config::{ComparisonMode, ExportScope, QcConfig};
pub use engine::run;
pub use error::QcError;
pub use model::{Interval, QcOutcome, QcReport};
pub use table::{Cell, Table};
