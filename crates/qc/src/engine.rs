use crate::classify::{compute_thresholds, flag_outliers, resolve_selection};
use crate::config::QcConfig;
use crate::dataset::resolve_labels;
use crate::differ::compute_deviations;
use crate::error::QcError;
use crate::matcher::match_segments;
use crate::model::{
    Dataset, DeviationTable, Interval, MatchDiagnostics, MatchOutcome, MatchOutput, QcMeta,
    QcOutcome, QcReport, Side, SideLabels, ThresholdOutcome, ThresholdSet,
};
use crate::summary::compute_summary;
use crate::table::Table;

/// Output of the shared match → difference → threshold stages.
enum Staged {
    NoMatches { meta: QcMeta, diagnostics: MatchDiagnostics },
    Differenced {
        meta: QcMeta,
        matched: MatchOutput,
        deviations: DeviationTable,
        thresholds: ThresholdSet,
    },
}

fn stage(config: &QcConfig, left: &Table, right: &Table) -> Result<Staged, QcError> {
    config.validate()?;

    let labels = resolve_labels(config.mode, left, right, &config.columns)?;
    let left = Dataset::from_table(Side::Left, left, &config.columns)?;
    let right = Dataset::from_table(Side::Right, right, &config.columns)?;
    let meta = meta(config, labels.clone());

    let matched = match match_segments(&left, &right, labels, &config.matching) {
        MatchOutcome::Matched(out) => out,
        MatchOutcome::Empty { diagnostics, .. } => {
            log::info!("no matched segments, skipping differencing");
            return Ok(Staged::NoMatches { meta, diagnostics });
        }
    };

    let deviations = compute_deviations(&matched, &config.measures)?;

    let mut thresholds = compute_thresholds(&deviations, config.mode, &config.thresholds);
    thresholds.apply_overrides(&config.thresholds.overrides)?;

    Ok(Staged::Differenced { meta, matched, deviations, thresholds })
}

/// Run the full QC pipeline per config: match, difference, threshold, flag.
///
/// An empty match is a normal outcome (`QcOutcome::NoMatches`), not an error.
pub fn run(config: &QcConfig, left: &Table, right: &Table) -> Result<QcOutcome, QcError> {
    let (meta, matched, deviations, thresholds) = match stage(config, left, right)? {
        Staged::NoMatches { meta, diagnostics } => {
            return Ok(QcOutcome::NoMatches { meta, diagnostics })
        }
        Staged::Differenced { meta, matched, deviations, thresholds } => {
            (meta, matched, deviations, thresholds)
        }
    };

    let selection = resolve_selection(&deviations, &config.output.select, &config.measure_groups)?;
    let outliers = flag_outliers(&deviations, &thresholds, &selection)?;
    let summary = compute_summary(&matched.diagnostics, &deviations, &outliers);

    Ok(QcOutcome::Complete(Box::new(QcReport {
        meta,
        diagnostics: matched.diagnostics,
        skipped_measures: deviations.skipped.clone(),
        thresholds,
        outliers,
        summary,
        deviations,
    })))
}

/// Match and difference, then compute per-measure thresholds (config
/// overrides applied). The measure selection is neither resolved nor flagged.
pub fn thresholds(config: &QcConfig, left: &Table, right: &Table) -> Result<ThresholdOutcome, QcError> {
    Ok(match stage(config, left, right)? {
        Staged::NoMatches { meta, diagnostics } => ThresholdOutcome::NoMatches { meta, diagnostics },
        Staged::Differenced { meta, deviations, thresholds, .. } => ThresholdOutcome::Computed {
            meta,
            pairs: deviations.rows.len(),
            thresholds,
        },
    })
}

fn meta(config: &QcConfig, labels: SideLabels) -> QcMeta {
    QcMeta {
        config_name: config.name.clone(),
        mode: config.mode,
        labels,
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        run_at: chrono::Utc::now().to_rfc3339(),
    }
}

impl QcReport {
    /// Override one measure's interval and re-flag with the same selection.
    /// Defaults for every other measure are kept as computed.
    pub fn set_override(&mut self, measure: &str, interval: Interval) -> Result<(), QcError> {
        self.thresholds.set_override(measure, interval)?;
        self.reflag()
    }

    pub fn clear_override(&mut self, measure: &str) -> Result<(), QcError> {
        self.thresholds.clear_override(measure)?;
        self.reflag()
    }

    fn reflag(&mut self) -> Result<(), QcError> {
        let selection = self.outliers.selection.clone();
        self.outliers = flag_outliers(&self.deviations, &self.thresholds, &selection)?;
        self.summary = compute_summary(&self.diagnostics, &self.deviations, &self.outliers);
        Ok(())
    }
}
