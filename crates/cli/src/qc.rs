//! `pavecheck run | thresholds | validate`: config-driven survey QC.

use std::path::{Path, PathBuf};

use clap::{Subcommand, ValueEnum};

use pavecheck_qc::config::{ExportScope, MatchPolicy, QcConfig};
use pavecheck_qc::export::write_csv;
use pavecheck_qc::engine::thresholds;
use pavecheck_qc::model::{QcOutcome, QcReport, Side, ThresholdDefault, ThresholdOutcome};
use pavecheck_qc::summary::group_counts;
use pavecheck_qc::{Interval, QcError, Table};

use crate::exit_codes::{
    qc_exit_code, EXIT_NO_MATCHES, EXIT_OUTLIERS, EXIT_RUNTIME, EXIT_USAGE,
};
use crate::CliError;

#[derive(Subcommand)]
pub enum QcCommands {
    /// Match two surveys, compute deviations and flag outliers
    #[command(after_help = "\
Exit codes:
  0  no outliers flagged
  1  outliers flagged
  3  invalid config
  4  IO or data error
  5  no segment pairs matched

Examples:
  pavecheck run audit.qc.toml
  pavecheck run audit.qc.toml --csv flagged.csv
  pavecheck run audit.qc.toml --csv all.csv --scope all --json
  pavecheck run yoy.qc.toml --select IRI --override IRI=-12:10
  pavecheck run yoy.qc.toml --left fy2022.csv --right fy2023.csv")]
    Run {
        #[command(flatten)]
        common: RunArgs,

        /// Write the flat CSV artifact to this path
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Rows written to the CSV artifact
        #[arg(long, value_enum)]
        scope: Option<ScopeArg>,

        /// Also print row/flag counts grouped by this column (left side)
        #[arg(long, value_name = "COLUMN")]
        group_by: Option<String>,

        /// Measure or measure group to flag on (repeatable); overrides [output] select
        #[arg(long = "select", value_name = "NAME")]
        select: Vec<String>,
    },

    /// Compute and print per-measure thresholds without flagging
    #[command(after_help = "\
Examples:
  pavecheck thresholds audit.qc.toml
  pavecheck thresholds yoy.qc.toml --json")]
    Thresholds {
        #[command(flatten)]
        common: RunArgs,
    },

    /// Validate a QC config without running
    #[command(after_help = "\
Examples:
  pavecheck validate audit.qc.toml")]
    Validate {
        /// Path to the .qc.toml config file
        config: PathBuf,
    },
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Path to the .qc.toml config file
    config: PathBuf,

    /// Left (Pathway / earlier year) survey CSV; overrides [datasets] left
    #[arg(long)]
    left: Option<PathBuf>,

    /// Right (audit / later year) survey CSV; overrides [datasets] right
    #[arg(long)]
    right: Option<PathBuf>,

    /// Offset tolerance in miles; overrides [matching] tolerance
    #[arg(long)]
    tolerance: Option<f64>,

    /// Keep only the closest candidate per left segment
    #[arg(long)]
    closest_only: bool,

    /// Operator threshold: MEASURE=UPPER (audit) or MEASURE=LOWER:UPPER (repeatable)
    #[arg(long = "override", value_name = "MEASURE=BOUNDS")]
    overrides: Vec<String>,

    /// Print one JSON document to stdout instead of the human summary
    #[arg(long)]
    json: bool,

    /// Write the JSON report to a file
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ScopeArg {
    All,
    FlaggedOnly,
}

impl From<ScopeArg> for ExportScope {
    fn from(s: ScopeArg) -> Self {
        match s {
            ScopeArg::All => ExportScope::All,
            ScopeArg::FlaggedOnly => ExportScope::FlaggedOnly,
        }
    }
}

pub fn cmd_qc(cmd: QcCommands) -> Result<(), CliError> {
    match cmd {
        QcCommands::Run { common, csv, scope, group_by, select } => {
            cmd_run(common, csv, scope, group_by, select)
        }
        QcCommands::Thresholds { common } => cmd_thresholds(common),
        QcCommands::Validate { config } => cmd_validate(config),
    }
}

fn qc_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

fn from_qc(err: QcError) -> CliError {
    let hint = match &err {
        QcError::MissingKeyColumn { .. } => {
            Some("map source column names under [columns] in the config".to_string())
        }
        QcError::SideLabelConflict(_) => {
            Some("year-over-year runs need two different fiscal years".to_string())
        }
        QcError::MixedFiscalYears { .. } => {
            Some("split the survey by fiscal year before comparing".to_string())
        }
        _ => None,
    };
    CliError { code: qc_exit_code(&err), message: err.to_string(), hint }
}

// ── Loading ─────────────────────────────────────────────────────────

fn read_config(path: &Path) -> Result<QcConfig, CliError> {
    let config_str = std::fs::read_to_string(path)
        .map_err(|e| qc_err(EXIT_RUNTIME, format!("cannot read config {}: {e}", path.display())))?;
    QcConfig::from_toml(&config_str).map_err(from_qc)
}

fn load_table(path: &Path) -> Result<Table, CliError> {
    let file = std::fs::File::open(path)
        .map_err(|e| qc_err(EXIT_RUNTIME, format!("cannot read {}: {e}", path.display())))?;
    Table::from_csv_reader(std::io::BufReader::new(file))
        .map_err(|e| qc_err(EXIT_RUNTIME, format!("{}: {e}", path.display())))
}

/// Parse `IRI=25` or `IRI=-3.5:4`.
fn parse_override(arg: &str) -> Result<(String, Interval), CliError> {
    let usage = || {
        qc_err(EXIT_USAGE, format!("invalid --override '{arg}'"))
            .with_hint("expected MEASURE=UPPER or MEASURE=LOWER:UPPER, e.g. IRI=25 or IRI=-12:10")
    };
    let (measure, bounds) = arg.split_once('=').ok_or_else(usage)?;
    let measure = measure.trim();
    if measure.is_empty() {
        return Err(usage());
    }
    let number = |s: &str| s.trim().parse::<f64>().map_err(|_| usage());
    let interval = match bounds.split_once(':') {
        Some((lo, hi)) => Interval::new(number(lo)?, number(hi)?),
        None => Interval::new(0.0, number(bounds)?),
    };
    Ok((measure.to_string(), interval))
}

/// Config + both tables, with command-line overrides applied. Dataset paths
/// from the config resolve relative to the config file's directory.
struct Prepared {
    config: QcConfig,
    base_dir: PathBuf,
    left: Table,
    right: Table,
}

fn prepare(args: &RunArgs, select: &[String]) -> Result<Prepared, CliError> {
    let mut config = read_config(&args.config)?;
    let base_dir = args
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    if let Some(tol) = args.tolerance {
        config.matching.tolerance = tol;
    }
    if args.closest_only {
        config.matching.policy = MatchPolicy::ClosestOnly;
    }
    if !select.is_empty() {
        config.output.select = select.to_vec();
    }
    for arg in &args.overrides {
        let (measure, interval) = parse_override(arg)?;
        config.thresholds.overrides.insert(measure, interval);
    }
    config.validate().map_err(from_qc)?;

    let from_config = |side: Side| {
        config.datasets.as_ref().map(|d| match side {
            Side::Left => base_dir.join(&d.left),
            Side::Right => base_dir.join(&d.right),
        })
    };
    let left_path = args.left.clone().or_else(|| from_config(Side::Left)).ok_or_else(|| {
        qc_err(EXIT_USAGE, "no left dataset").with_hint("pass --left or set [datasets] left in the config")
    })?;
    let right_path = args.right.clone().or_else(|| from_config(Side::Right)).ok_or_else(|| {
        qc_err(EXIT_USAGE, "no right dataset").with_hint("pass --right or set [datasets] right in the config")
    })?;

    log::info!("left: {}, right: {}", left_path.display(), right_path.display());
    let left = load_table(&left_path)?;
    let right = load_table(&right_path)?;

    Ok(Prepared { config, base_dir, left, right })
}

fn emit_json(outcome: &QcOutcome, json_output: bool, output_file: Option<&Path>) -> Result<(), CliError> {
    if !json_output && output_file.is_none() {
        return Ok(());
    }
    let json_str = serde_json::to_string_pretty(outcome)
        .map_err(|e| qc_err(EXIT_RUNTIME, format!("JSON serialization error: {e}")))?;

    if let Some(path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| qc_err(EXIT_RUNTIME, format!("cannot write {}: {e}", path.display())))?;
        eprintln!("wrote {}", path.display());
    }
    if json_output {
        println!("{json_str}");
    }
    Ok(())
}

// ── run ─────────────────────────────────────────────────────────────

fn cmd_run(
    args: RunArgs,
    csv: Option<PathBuf>,
    scope: Option<ScopeArg>,
    group_by: Option<String>,
    select: Vec<String>,
) -> Result<(), CliError> {
    let prepared = prepare(&args, &select)?;
    let config = &prepared.config;

    let outcome = pavecheck_qc::run(config, &prepared.left, &prepared.right).map_err(from_qc)?;

    let json_file = args
        .output
        .clone()
        .or_else(|| config.output.json.as_ref().map(|p| prepared.base_dir.join(p)));
    emit_json(&outcome, args.json, json_file.as_deref())?;

    let report = match &outcome {
        QcOutcome::NoMatches { meta, diagnostics } => {
            eprintln!(
                "{} '{}': no segment pairs matched ({} left / {} right records, {} county-filtered, {} rejected by tolerance)",
                meta.mode,
                meta.config_name,
                diagnostics.left_records,
                diagnostics.right_records,
                diagnostics.county_filtered,
                diagnostics.rejected_by_tolerance,
            );
            return Err(qc_err(EXIT_NO_MATCHES, "no matches")
                .with_hint("check county/route spelling and the offset tolerance"));
        }
        QcOutcome::Complete(report) => report,
    };

    let csv_path = csv.or_else(|| config.output.csv.as_ref().map(|p| prepared.base_dir.join(p)));
    if let Some(path) = csv_path {
        let scope = scope.map(ExportScope::from).unwrap_or(config.output.scope);
        let file = std::fs::File::create(&path)
            .map_err(|e| qc_err(EXIT_RUNTIME, format!("cannot create {}: {e}", path.display())))?;
        let rows = write_csv(std::io::BufWriter::new(file), &report.deviations, &report.outliers, scope)
            .map_err(from_qc)?;
        eprintln!("wrote {} ({rows} row(s))", path.display());
    }

    print_summary(report);

    if let Some(column) = group_by {
        let groups = group_counts(&report.deviations, &report.outliers, &column, Side::Left)
            .map_err(from_qc)?;
        eprintln!("by {column}:");
        for g in groups {
            eprintln!("  {:<20} {:>6} row(s) {:>6} flagged", g.value, g.rows, g.flagged);
        }
    }

    if report.summary.flagged > 0 {
        // Outliers are a result, not a failure: the summary already said so.
        return Err(qc_err(EXIT_OUTLIERS, ""));
    }
    Ok(())
}

/// Human summary to stderr.
fn print_summary(report: &QcReport) {
    let s = &report.summary;
    eprintln!(
        "{} '{}' ({} vs {}): {} pair(s), {} flagged",
        report.meta.mode,
        report.meta.config_name,
        report.meta.labels.left,
        report.meta.labels.right,
        s.pairs,
        s.flagged,
    );
    if s.ambiguous_left > 0 {
        eprintln!(
            "warning: {} left segment(s) matched more than one right segment",
            s.ambiguous_left
        );
    }
    for applied in &report.outliers.applied {
        let count = s
            .flagged_by_measure
            .iter()
            .find(|(m, _)| *m == applied.measure)
            .map(|(_, n)| *n)
            .unwrap_or(0);
        eprintln!(
            "  {:<16} [{}, {}]{} {count} flagged",
            applied.measure,
            applied.interval.lower,
            applied.interval.upper,
            if applied.overridden { " (override)" } else { "" },
        );
    }
    for excluded in &report.outliers.excluded {
        eprintln!("  {:<16} excluded: {}", excluded.measure, excluded.reason);
    }
    if !report.skipped_measures.is_empty() {
        eprintln!("  not differenced: {}", report.skipped_measures.join(", "));
    }
}

// ── thresholds ──────────────────────────────────────────────────────

fn cmd_thresholds(args: RunArgs) -> Result<(), CliError> {
    let prepared = prepare(&args, &[])?;
    let outcome = thresholds(&prepared.config, &prepared.left, &prepared.right).map_err(from_qc)?;

    let (meta, pairs, thresholds) = match outcome {
        ThresholdOutcome::NoMatches { .. } => return Err(qc_err(EXIT_NO_MATCHES, "no matches")),
        ThresholdOutcome::Computed { meta, pairs, thresholds } => (meta, pairs, thresholds),
    };

    if args.json {
        let json_str = serde_json::to_string_pretty(&thresholds)
            .map_err(|e| qc_err(EXIT_RUNTIME, format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
        return Ok(());
    }

    eprintln!("{} thresholds over {pairs} pair(s):", meta.mode);
    for t in &thresholds.measures {
        let default = match &t.default {
            ThresholdDefault::Computed { interval } => {
                format!("[{}, {}]", interval.lower, interval.upper)
            }
            ThresholdDefault::Degenerate { detail } => format!("degenerate: {detail}"),
        };
        let over = t
            .operator_override
            .map(|iv| format!(" override [{}, {}]", iv.lower, iv.upper))
            .unwrap_or_default();
        eprintln!(
            "  {:<16} {:<10} n={:<6} {default}{over}",
            t.measure,
            t.method.to_string(),
            t.samples
        );
    }
    Ok(())
}

// ── validate ────────────────────────────────────────────────────────

fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = read_config(&config_path)?;
    eprintln!(
        "valid: {} '{}' with {} measure(s), {} group(s), tolerance {}",
        config.mode,
        config.name,
        config.measures.len(),
        config.measure_groups.len(),
        config.matching.tolerance,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_upper_only() {
        let (m, iv) = parse_override("IRI=25").unwrap();
        assert_eq!(m, "IRI");
        assert_eq!(iv, Interval::new(0.0, 25.0));
    }

    #[test]
    fn override_band() {
        let (m, iv) = parse_override(" RUT = -0.1:0.2").unwrap();
        assert_eq!(m, "RUT");
        assert_eq!(iv, Interval::new(-0.1, 0.2));
    }

    #[test]
    fn override_malformed() {
        for bad in ["IRI", "=25", "IRI=abc", "IRI=1:x"] {
            let err = parse_override(bad).unwrap_err();
            assert_eq!(err.code, EXIT_USAGE, "{bad}");
        }
    }
}
